use std::sync::OnceLock;

use berth_shared::errors::{BerthError, BerthResult};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::runtime::constants::filenames;
use crate::runtime::layout::FilesystemLayout;

/// Keeps the background log writer alive for the life of the process.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Route tracing output to `<home>/logs/berth.log` with daily rotation.
///
/// Only the first call in a process installs a subscriber; later calls,
/// including those of other runtimes, are no-ops.
pub fn init_logging_for(layout: &FilesystemLayout) -> BerthResult<()> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    let logs_dir = layout.logs_dir();
    std::fs::create_dir_all(&logs_dir)
        .map_err(|e| BerthError::Storage(format!("failed to create logs dir: {e}")))?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, filenames::LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    if LOG_GUARD.set(guard).is_err() {
        // Lost a race with another runtime; its writer is the one in use.
        return Ok(());
    }

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| BerthError::Config(format!("invalid log filter: {e}")))?;

    register_to_tracing(non_blocking, env_filter);
    Ok(())
}

pub fn register_to_tracing(non_blocking: NonBlocking, env_filter: EnvFilter) {
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false),
        )
        .try_init();
}
