//! Runtime-level metrics (aggregate across all containers and jobs).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Storage for runtime-wide metrics.
///
/// Shared by the runtime, every container it creates, and the job streamer.
/// All counters are monotonic.
#[derive(Clone, Default, Debug)]
pub struct RuntimeMetricsStorage {
    pub(crate) containers_created: Arc<AtomicU64>,
    pub(crate) containers_started: Arc<AtomicU64>,
    pub(crate) containers_destroyed: Arc<AtomicU64>,
    pub(crate) jobs_started: Arc<AtomicU64>,
    pub(crate) jobs_completed: Arc<AtomicU64>,
    pub(crate) jobs_failed: Arc<AtomicU64>,
}

impl RuntimeMetricsStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Handle for querying runtime-wide metrics.
///
/// Cloneable, lightweight handle (only Arc pointers).
#[derive(Clone, Debug)]
pub struct RuntimeMetrics {
    storage: RuntimeMetricsStorage,
}

impl RuntimeMetrics {
    pub(crate) fn new(storage: RuntimeMetricsStorage) -> Self {
        Self { storage }
    }

    /// Containers created through `Runtime::create()` (restored ones excluded).
    pub fn containers_created_total(&self) -> u64 {
        self.storage.containers_created.load(Ordering::Relaxed)
    }

    /// Successful `start()` calls, restarts included.
    pub fn containers_started_total(&self) -> u64 {
        self.storage.containers_started.load(Ordering::Relaxed)
    }

    pub fn containers_destroyed_total(&self) -> u64 {
        self.storage.containers_destroyed.load(Ordering::Relaxed)
    }

    pub fn jobs_started_total(&self) -> u64 {
        self.storage.jobs_started.load(Ordering::Relaxed)
    }

    pub fn jobs_completed_total(&self) -> u64 {
        self.storage.jobs_completed.load(Ordering::Relaxed)
    }

    pub fn jobs_failed_total(&self) -> u64 {
        self.storage.jobs_failed.load(Ordering::Relaxed)
    }
}
