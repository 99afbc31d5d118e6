//! Per-run exit monitor.
//!
//! One task per successful start owns the child process. When the process
//! exits the monitor, in order:
//! 1. records the exit code and clears `running`,
//! 2. closes the run's conduits,
//! 3. persists the record,
//! 4. publishes the exit event, releasing every waiter.

use std::sync::Arc;

use tokio::process::Child;
use tokio::task::JoinHandle;

use super::io::ContainerIo;
use super::process::ExitStatus;
use super::{ContainerInner, ExitEvent};
use crate::runtime::constants::timeouts;

pub(super) fn spawn(
    inner: Arc<ContainerInner>,
    mut child: Child,
    io: Arc<ContainerIo>,
    run: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let exit_code = match child.wait().await {
            Ok(status) => ExitStatus::from(status).code(),
            Err(e) => {
                tracing::error!(
                    container_id = %inner.id.short(),
                    error = %e,
                    "Failed to wait for container process"
                );
                -1
            }
        };

        inner.record_exit(exit_code);

        io.close(timeouts::OUTPUT_DRAIN_GRACE).await;

        if let Err(e) = inner.persist() {
            tracing::warn!(
                container_id = %inner.id.short(),
                error = %e,
                "Failed to persist container state after exit"
            );
        }

        inner.exits.send_replace(ExitEvent { run, exit_code });

        tracing::info!(
            container_id = %inner.id.short(),
            exit_code,
            run,
            "Container process exited"
        );
    })
}
