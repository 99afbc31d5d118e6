//! Lifecycle operations: start, stop, kill, restart, destroy.
//!
//! All of them hold the container's lifecycle lock for their whole duration.
//! None of them writes `running = false`; only the monitor does.

use std::sync::atomic::Ordering;
use std::time::Duration;

use berth_shared::errors::{BerthError, BerthResult};
use nix::sys::signal::Signal;

use super::io::ContainerIo;
use super::{Container, monitor, process};
use crate::metrics::RuntimeMetricsStorage;

impl Container {
    /// Start the container's process.
    ///
    /// Valid from Created and Stopped. Fails with `AlreadyRunning` otherwise.
    pub async fn start(&self) -> BerthResult<()> {
        let _guard = self.inner.lifecycle.lock().await;
        self.start_locked().await
    }

    /// Kill the process with SIGKILL and wait for the monitor to record
    /// the exit.
    pub async fn kill(&self) -> BerthResult<()> {
        let _guard = self.inner.lifecycle.lock().await;
        self.kill_locked().await.map(|_| ())
    }

    /// Stop gracefully: SIGTERM, then SIGKILL if the process is still alive
    /// after `timeout`. A zero timeout kills immediately.
    ///
    /// Stopping a container that is not running is a no-op.
    pub async fn stop(&self, timeout: Duration) -> BerthResult<()> {
        let _guard = self.inner.lifecycle.lock().await;
        self.stop_locked(timeout).await
    }

    /// Stop (if running) and start again under one lock acquisition.
    ///
    /// If the start fails the container is left Stopped.
    pub async fn restart(&self, timeout: Duration) -> BerthResult<()> {
        let _guard = self.inner.lifecycle.lock().await;
        self.stop_locked(timeout).await?;
        self.start_locked().await
    }

    /// Remove the container.
    ///
    /// `unregister` runs after the process is gone and before the writable
    /// layer is released, still under the lifecycle lock.
    pub(crate) async fn destroy_with<F>(&self, force: bool, unregister: F) -> BerthResult<()>
    where
        F: FnOnce() -> BerthResult<()>,
    {
        let _guard = self.inner.lifecycle.lock().await;
        self.ensure_present()?;

        if !self.status().can_remove() {
            if !force {
                return Err(BerthError::Conflict(format!(
                    "cannot remove running container {}: stop it first or force removal",
                    self.short_id()
                )));
            }
            ignore_not_running(self.kill_locked().await.map(|_| ()))?;
        }

        unregister()?;
        self.inner.removed.store(true, Ordering::Release);

        self.join_monitor().await;
        self.inner.layout.release()?;

        RuntimeMetricsStorage::inc(&self.inner.metrics.containers_destroyed);
        tracing::info!(container_id = %self.short_id(), "Container removed");
        Ok(())
    }

    // ========================================================================
    // Locked implementations
    // ========================================================================

    async fn start_locked(&self) -> BerthResult<()> {
        self.ensure_present()?;
        if !self.status().can_start() {
            return Err(BerthError::AlreadyRunning(format!(
                "container {} is already running",
                self.short_id()
            )));
        }

        // The previous run's monitor must be done before a new run starts.
        self.join_monitor().await;

        let spawned = process::spawn(&self.inner.id, &self.inner.config, &self.rw_path())?;
        let handle = spawned.handle;
        let io = ContainerIo::new(spawned.stdin, spawned.stdout, spawned.stderr);

        // Conduits go in before the state flips so that anyone observing
        // `running` finds the new run's conduits.
        *self.inner.io.write() = Some(io.clone());

        let run = {
            let mut slot = self.inner.slot.lock();
            slot.state.mark_running(handle.pid());
            slot.process = Some(handle);
            slot.run += 1;
            slot.run
        };

        if let Err(e) = self.inner.persist() {
            tracing::warn!(container_id = %self.short_id(), error = %e, "Failed to persist running state");
        }

        let monitor = monitor::spawn(self.inner.clone(), spawned.child, io, run);
        *self.inner.monitor.lock() = Some(monitor);

        RuntimeMetricsStorage::inc(&self.inner.metrics.containers_started);
        tracing::info!(
            container_id = %self.short_id(),
            pid = handle.pid(),
            run,
            "Container started"
        );
        Ok(())
    }

    async fn kill_locked(&self) -> BerthResult<i32> {
        let (process, run) = self.running_process().ok_or_else(|| {
            BerthError::NotRunning(format!("container {} is not running", self.short_id()))
        })?;

        if let Some(process) = process {
            ignore_not_running(process.signal(Signal::SIGKILL))?;
        }
        self.wait_run(run).await
    }

    async fn stop_locked(&self, timeout: Duration) -> BerthResult<()> {
        let Some((process, run)) = self.running_process() else {
            return Ok(());
        };

        if timeout.is_zero() {
            return ignore_not_running(self.kill_locked().await.map(|_| ()));
        }

        if let Some(process) = process {
            ignore_not_running(process.signal(Signal::SIGTERM))?;
        }

        match tokio::time::timeout(timeout, self.wait_run(run)).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => {
                tracing::warn!(
                    container_id = %self.short_id(),
                    ?timeout,
                    "Container did not stop gracefully, killing"
                );
                ignore_not_running(self.kill_locked().await.map(|_| ()))
            }
        }
    }

    async fn join_monitor(&self) {
        let previous = self.inner.monitor.lock().take();
        if let Some(handle) = previous {
            if let Err(e) = handle.await {
                tracing::warn!(container_id = %self.short_id(), error = %e, "Monitor task failed");
            }
        }
    }

    fn ensure_present(&self) -> BerthResult<()> {
        if self.is_removed() {
            return Err(BerthError::NotFound(format!(
                "container {} has been removed",
                self.short_id()
            )));
        }
        Ok(())
    }
}

/// The process disappearing on its own while we act on it is success.
fn ignore_not_running(result: BerthResult<()>) -> BerthResult<()> {
    match result {
        Err(BerthError::NotRunning(_)) => Ok(()),
        other => other,
    }
}
