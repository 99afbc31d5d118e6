//! Berth Shared - Types common to the engine and its transport bindings
//!
//! This crate contains the error taxonomy, the raw-stream protocol constants
//! and the attach request parameters.

pub mod attach;
pub mod constants;
pub mod errors;

pub use attach::AttachOptions;
pub use errors::{BerthError, BerthResult};
