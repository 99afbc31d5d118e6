//! Constants for the berth runtime
//!
//! Centralized location for hardcoded values, paths, and timing policy.

use std::time::Duration;

// Re-export protocol constants shared with transport bindings
pub use berth_shared::constants::{exit, stream};

pub mod envs {
    /// Overrides the runtime home directory.
    pub const BERTH_HOME: &str = "BERTH_HOME";

    /// Exported to every container process: its own identifier.
    pub const CONTAINER_ID: &str = "BERTH_CONTAINER_ID";
}

/// Lifecycle timing policy
pub mod timeouts {
    use super::Duration;

    /// Graceful phase of stop() when the caller gives no timeout.
    pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

    /// How long the monitor lets the output pumps drain after process exit
    /// before closing the conduits regardless.
    ///
    /// Bounded because a daemonized grandchild can keep the pipe open forever.
    pub const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(250);

    /// How long an attach session keeps delivering output after the
    /// client's input ends, before detaching.
    pub const CLIENT_HANGUP_GRACE: Duration = Duration::from_secs(1);

    /// Upper bound for one progress-line write to a job subscriber.
    pub const DEFAULT_STREAM_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Container configuration limits
pub mod limits {
    /// Smallest accepted memory limit (512 KiB).
    pub const MIN_MEMORY_BYTES: u64 = 512 * 1024;
}

/// Stream buffering
pub mod buffers {
    /// Read buffer for output pumps and stdin forwarding.
    pub const COPY_CHUNK_SIZE: usize = 4096;

    /// Chunks retained per output conduit for slow attach subscribers.
    pub const OUTPUT_BROADCAST_CAPACITY: usize = 1024;
}

/// File naming patterns
pub mod filenames {
    use crate::runtime::layout::dirs;
    use std::path::{Path, PathBuf};

    /// Lock file name
    pub const LOCK_FILE: &str = ".lock";

    /// Persisted container record
    pub const CONTAINER_RECORD: &str = "config.json";

    /// Runtime log file (inside the logs directory)
    pub const LOG_FILE: &str = "berth.log";

    pub fn container_home(home_dir: &Path, container_id: &str) -> PathBuf {
        home_dir.join(dirs::CONTAINERS_DIR).join(container_id)
    }
}
