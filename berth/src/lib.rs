//! Berth - container lifecycle control plane.
//!
//! Manages containers (one OS process each) through Created → Running →
//! Stopped, observes their exit, lets clients attach to their standard
//! streams over hijacked connections, and streams long-running jobs (pull,
//! push, build) to clients that may disconnect at any time.
//!
//! ```no_run
//! use berth::{ContainerConfig, Runtime, RuntimeOptions};
//!
//! # async fn example() -> berth::BerthResult<()> {
//! let runtime = Runtime::new(RuntimeOptions::with_home("/var/lib/berth"))?;
//! let container = runtime.create(ContainerConfig::new("busybox", ["ls", "-al"]))?;
//! container.start().await?;
//! let exit_code = container.wait().await?;
//! # let _ = exit_code;
//! # Ok(())
//! # }
//! ```

pub mod attach;
pub mod container;
pub mod hijack;
pub mod images;
pub mod jobs;
pub mod metrics;
pub mod runtime;
pub mod util;

pub use attach::AttachSession;
pub use berth_shared::{AttachOptions, BerthError, BerthResult};
pub use container::{Container, ContainerState, ContainerStatus, ExitStatus, OutputKind};
pub use hijack::{BufferedResponse, Hijack, RawStream, StreamHijacker, UpgradableConn};
pub use images::{ImageRecord, ImageStore, LocalImageStore};
pub use jobs::{Job, JobHandle, JobKind, JobOutcome, JobStreamer, ProgressSink};
pub use metrics::RuntimeMetrics;
pub use runtime::Runtime;
pub use runtime::options::{ContainerConfig, RuntimeOptions};
pub use runtime::types::{Bytes, ContainerId, ContainerInfo, ImageId, RuntimeInfo};
pub use util::init_logging_for;
