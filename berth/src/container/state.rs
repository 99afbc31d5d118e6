//! Container lifecycle status and state record.
//!
//! ```text
//! create()  → Created
//! start()   → Running   (pid recorded)
//! exit      → Stopped   (exit code recorded by the monitor)
//! start()   → Running   (again, from Stopped)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status derived from a [`ContainerState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Created but never started.
    Created,

    /// A process is alive for this container.
    Running,

    /// Process exited. Writable layer is preserved and the container can
    /// be started again.
    Stopped,
}

impl ContainerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerStatus::Running)
    }

    /// Created containers need their first start, Stopped ones can restart.
    pub fn can_start(&self) -> bool {
        matches!(self, ContainerStatus::Created | ContainerStatus::Stopped)
    }

    /// Running containers must be stopped (or force-removed) first.
    pub fn can_remove(&self) -> bool {
        !self.is_running()
    }

    pub fn can_attach(&self) -> bool {
        matches!(self, ContainerStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Stopped => "stopped",
        }
    }
}

impl std::str::FromStr for ContainerStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ContainerStatus::Created),
            "running" => Ok(ContainerStatus::Running),
            "stopped" | "exited" => Ok(ContainerStatus::Stopped),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Mutable runtime state of a container.
///
/// Only the lifecycle operations (start) and the monitor (exit) write it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    pub running: bool,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ContainerState {
    /// State of a container that has never run.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> ContainerStatus {
        if self.running {
            ContainerStatus::Running
        } else if self.started_at.is_some() {
            ContainerStatus::Stopped
        } else {
            ContainerStatus::Created
        }
    }

    /// A process was spawned with `pid`.
    pub fn mark_running(&mut self, pid: u32) {
        self.running = true;
        self.pid = Some(pid);
        self.started_at = Some(Utc::now());
        self.finished_at = None;
        self.exit_code = None;
    }

    /// The process exited with `exit_code`.
    pub fn mark_stopped(&mut self, exit_code: i32) {
        self.running = false;
        self.pid = None;
        self.exit_code = Some(exit_code);
        self.finished_at = Some(Utc::now());
    }

    /// Fix up a record loaded from disk: no process survives the runtime
    /// that spawned it. Returns true when the record changed.
    pub fn reset_after_restore(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.running = false;
        self.pid = None;
        if self.exit_code.is_none() {
            self.exit_code = Some(-1);
        }
        if self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
        true
    }

    /// Check the structural invariants of the record.
    pub fn is_consistent(&self) -> bool {
        match self.status() {
            ContainerStatus::Running => self.pid.is_some() && self.finished_at.is_none(),
            ContainerStatus::Stopped => {
                self.pid.is_none() && self.finished_at.is_some() && self.exit_code.is_some()
            }
            ContainerStatus::Created => {
                self.pid.is_none() && self.exit_code.is_none() && self.finished_at.is_none()
            }
        }
    }
}
