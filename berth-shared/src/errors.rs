//! Error taxonomy shared by the engine and transport bindings.

use thiserror::Error;

/// Errors surfaced by berth operations.
///
/// Lifecycle failures are returned synchronously to the caller of the
/// operation. Streaming failures (`Io`) only terminate the session that hit
/// them and are never reported as a lifecycle failure.
#[derive(Debug, Error)]
pub enum BerthError {
    /// Unknown container or job identifier.
    #[error("not found: {0}")]
    NotFound(String),

    /// The image reference could not be resolved in the image store.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// Start was requested on a container that is already running.
    #[error("container already running: {0}")]
    AlreadyRunning(String),

    /// The operation needs a running container (kill, attach, signal).
    #[error("container not running: {0}")]
    NotRunning(String),

    /// The request conflicts with the current state (delete while running,
    /// ambiguous identifier prefix).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The connection cannot be upgraded to a raw stream (or already was).
    #[error("hijack not supported: {0}")]
    HijackUnsupported(String),

    /// A bounded wait elapsed.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The OS refused to start the container process.
    #[error("failed to spawn process: {0}")]
    ProcessSpawnFailed(String),

    /// Conduit or stream I/O failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid configuration or options.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Persistent storage (layout, records, lock file) failure.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias used across berth crates.
pub type BerthResult<T> = Result<T, BerthError>;

impl From<std::io::Error> for BerthError {
    fn from(err: std::io::Error) -> Self {
        BerthError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BerthError {
    fn from(err: serde_json::Error) -> Self {
        BerthError::Storage(format!("invalid record: {}", err))
    }
}
