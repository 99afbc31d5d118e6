//! Container - one managed process with its state, conduits and exit signal.
//!
//! ## Architecture
//!
//! - `state`: status enum and the state record
//! - `process`: spawning and signalling the OS process
//! - `io`: per-run stdin/stdout/stderr conduits
//! - `lifecycle`: start/stop/kill/restart/destroy
//! - `monitor`: the per-run task that observes process exit

mod io;
mod lifecycle;
mod monitor;
mod process;
mod state;

pub use io::{ContainerIo, OutputKind, OutputSubscription};
pub use process::{ExitStatus, ProcessHandle};
pub use state::{ContainerState, ContainerStatus};

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use berth_shared::errors::{BerthError, BerthResult};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::metrics::RuntimeMetricsStorage;
use crate::runtime::constants::exit;
use crate::runtime::layout::ContainerLayout;
use crate::runtime::options::ContainerConfig;
use crate::runtime::types::{ContainerId, ContainerInfo, ImageId};

/// Published by the monitor once a run has been fully torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExitEvent {
    /// Run number, incremented by every successful start.
    pub run: u64,
    pub exit_code: i32,
}

/// What `config.json` holds for a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ContainerRecord {
    pub id: ContainerId,
    pub image: ImageId,
    pub created_at: DateTime<Utc>,
    pub config: ContainerConfig,
    pub state: ContainerState,
}

struct Slot {
    state: ContainerState,
    run: u64,
    process: Option<ProcessHandle>,
}

pub(crate) struct ContainerInner {
    id: ContainerId,
    config: ContainerConfig,
    image: ImageId,
    created_at: DateTime<Utc>,
    layout: ContainerLayout,

    /// Serializes start/stop/kill/restart/destroy. The monitor never takes it.
    lifecycle: tokio::sync::Mutex<()>,
    slot: Mutex<Slot>,
    exits: watch::Sender<ExitEvent>,
    io: RwLock<Option<Arc<ContainerIo>>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    persist_lock: Mutex<()>,
    removed: AtomicBool,
    metrics: RuntimeMetricsStorage,
}

impl ContainerInner {
    /// Monitor step one: the process is gone.
    fn record_exit(&self, exit_code: i32) {
        let mut slot = self.slot.lock();
        slot.state.mark_stopped(exit_code);
        slot.process = None;
    }

    fn persist(&self) -> BerthResult<()> {
        if self.removed.load(Ordering::Acquire) {
            return Ok(());
        }

        let _guard = self.persist_lock.lock();
        let record = ContainerRecord {
            id: self.id.clone(),
            image: self.image.clone(),
            created_at: self.created_at,
            config: self.config.clone(),
            state: self.slot.lock().state.clone(),
        };

        let data = serde_json::to_vec_pretty(&record)?;
        let path = self.layout.record_path();
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data).map_err(|e| {
            BerthError::Storage(format!("failed to write {}: {e}", tmp.display()))
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            BerthError::Storage(format!("failed to replace {}: {e}", path.display()))
        })?;
        Ok(())
    }
}

/// Handle to a container. Cheap to clone; every clone refers to the same
/// container.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    /// Create the on-disk home of a new container and persist its record.
    pub(crate) fn create(
        id: ContainerId,
        config: ContainerConfig,
        image: ImageId,
        layout: ContainerLayout,
        metrics: RuntimeMetricsStorage,
    ) -> BerthResult<Self> {
        layout.prepare()?;
        let container = Self::from_parts(
            id,
            config,
            image,
            Utc::now(),
            layout,
            ContainerState::new(),
            metrics,
        );
        container.inner.persist()?;
        Ok(container)
    }

    /// Load a container from its persisted record.
    pub(crate) fn restore(
        layout: ContainerLayout,
        metrics: RuntimeMetricsStorage,
    ) -> BerthResult<Self> {
        let data = std::fs::read(layout.record_path()).map_err(|e| {
            BerthError::Storage(format!(
                "failed to read {}: {e}",
                layout.record_path().display()
            ))
        })?;
        let mut record: ContainerRecord = serde_json::from_slice(&data)?;

        let dir_name = layout.root().file_name().and_then(|n| n.to_str());
        if dir_name != Some(record.id.as_str()) {
            return Err(BerthError::Storage(format!(
                "record id {} does not match directory {}",
                record.id,
                layout.root().display()
            )));
        }

        let changed = record.state.reset_after_restore();
        let container = Self::from_parts(
            record.id,
            record.config,
            record.image,
            record.created_at,
            layout,
            record.state,
            metrics,
        );
        if changed {
            container.inner.persist()?;
        }
        Ok(container)
    }

    fn from_parts(
        id: ContainerId,
        config: ContainerConfig,
        image: ImageId,
        created_at: DateTime<Utc>,
        layout: ContainerLayout,
        state: ContainerState,
        metrics: RuntimeMetricsStorage,
    ) -> Self {
        let (exits, _) = watch::channel(ExitEvent {
            run: 0,
            exit_code: state.exit_code.unwrap_or(exit::NEVER_RAN),
        });

        Self {
            inner: Arc::new(ContainerInner {
                id,
                config,
                image,
                created_at,
                layout,
                lifecycle: tokio::sync::Mutex::new(()),
                slot: Mutex::new(Slot {
                    state,
                    run: 0,
                    process: None,
                }),
                exits,
                io: RwLock::new(None),
                monitor: Mutex::new(None),
                persist_lock: Mutex::new(()),
                removed: AtomicBool::new(false),
                metrics,
            }),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> &ContainerId {
        &self.inner.id
    }

    pub fn short_id(&self) -> &str {
        self.inner.id.short()
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.inner.config
    }

    pub fn image(&self) -> &ImageId {
        &self.inner.image
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Snapshot of the state record.
    pub fn state(&self) -> ContainerState {
        self.inner.slot.lock().state.clone()
    }

    pub fn status(&self) -> ContainerStatus {
        self.inner.slot.lock().state.status()
    }

    pub fn is_running(&self) -> bool {
        self.inner.slot.lock().state.running
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.slot.lock().state.pid
    }

    /// Host path of the writable layer.
    pub fn rw_path(&self) -> PathBuf {
        self.inner.layout.rw_dir()
    }

    pub fn is_removed(&self) -> bool {
        self.inner.removed.load(Ordering::Acquire)
    }

    pub fn info(&self) -> ContainerInfo {
        let state = self.state();
        ContainerInfo {
            id: self.inner.id.clone(),
            short_id: self.short_id().to_string(),
            image: self.inner.image.clone(),
            command: self.inner.config.cmd.clone(),
            created_at: self.inner.created_at,
            status: state.status(),
            state,
        }
    }

    /// Conduits of the current (or most recent) run.
    pub fn io(&self) -> Option<Arc<ContainerIo>> {
        self.inner.io.read().clone()
    }

    /// Follow an output stream of the current run.
    pub fn subscribe(&self, kind: OutputKind) -> Option<OutputSubscription> {
        self.io().and_then(|io| io.subscribe(kind))
    }

    /// Close the current run's stdin, signalling end-of-input to the process.
    pub async fn close_stdin(&self) {
        if let Some(io) = self.io() {
            io.close_stdin().await;
        }
    }

    // ========================================================================
    // Waiting
    // ========================================================================

    /// Exit code of the current run.
    ///
    /// Returns at once with the recorded code when the container is not
    /// running (0 if it never ran). Otherwise blocks until the monitor has
    /// torn the run down.
    pub async fn wait(&self) -> BerthResult<i32> {
        let run = {
            let slot = self.inner.slot.lock();
            if !slot.state.running {
                return Ok(slot.state.exit_code.unwrap_or(exit::NEVER_RAN));
            }
            slot.run
        };
        self.wait_run(run).await
    }

    /// As [`wait`](Self::wait), giving up with `Timeout` after `timeout`.
    pub async fn wait_timeout(&self, timeout: Duration) -> BerthResult<i32> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| {
                BerthError::Timeout(format!(
                    "container {} still running after {:?}",
                    self.short_id(),
                    timeout
                ))
            })?
    }

    async fn wait_run(&self, run: u64) -> BerthResult<i32> {
        let mut rx = self.inner.exits.subscribe();
        let event = *rx
            .wait_for(|event| event.run >= run)
            .await
            .map_err(|_| BerthError::Internal("exit channel closed".into()))?;
        Ok(event.exit_code)
    }

    /// Pid and run number of the live process, if any.
    fn running_process(&self) -> Option<(Option<ProcessHandle>, u64)> {
        let slot = self.inner.slot.lock();
        slot.state.running.then_some((slot.process, slot.run))
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::layout::FilesystemLayout;
    use tempfile::TempDir;

    fn new_container(temp: &TempDir, cmd: &[&str]) -> Container {
        let layout = FilesystemLayout::new(temp.path().to_path_buf());
        let id = ContainerId::new();
        Container::create(
            id.clone(),
            ContainerConfig::new("img", cmd.iter().copied()),
            ImageId::new(),
            layout.container_layout(id.as_str()),
            RuntimeMetricsStorage::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_persists_record() {
        let temp = TempDir::new().unwrap();
        let container = new_container(&temp, &["true"]);

        let path = container.inner.layout.record_path();
        let record: ContainerRecord =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(&record.id, container.id());
        assert_eq!(record.state, ContainerState::new());
        assert!(container.rw_path().is_dir());
    }

    #[tokio::test]
    async fn test_wait_on_never_started_returns_zero() {
        let temp = TempDir::new().unwrap();
        let container = new_container(&temp, &["true"]);

        assert_eq!(container.status(), ContainerStatus::Created);
        assert_eq!(container.wait().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_restore_resets_running_record() {
        let temp = TempDir::new().unwrap();
        let container = new_container(&temp, &["true"]);
        container.inner.slot.lock().state.mark_running(12345);
        container.inner.persist().unwrap();

        let restored = Container::restore(
            container.inner.layout.clone(),
            RuntimeMetricsStorage::new(),
        )
        .unwrap();

        assert_eq!(restored.id(), container.id());
        assert_eq!(restored.status(), ContainerStatus::Stopped);
        assert!(restored.state().is_consistent());
    }

    #[tokio::test]
    async fn test_restore_rejects_malformed_image_id() {
        let temp = TempDir::new().unwrap();
        let container = new_container(&temp, &["true"]);
        let path = container.inner.layout.record_path();

        let mut record: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        record["image"] = serde_json::Value::from("abc");
        std::fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();

        let err = Container::restore(container.inner.layout.clone(), RuntimeMetricsStorage::new())
            .err()
            .unwrap();
        assert!(matches!(err, BerthError::Storage(_)), "got {err:?}");
    }
}
