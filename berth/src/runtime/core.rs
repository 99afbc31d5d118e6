//! The container registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use berth_shared::AttachOptions;
use berth_shared::errors::{BerthError, BerthResult};

use crate::attach::AttachSession;
use crate::container::Container;
use crate::hijack::Hijack;
use crate::images::{ImageStore, LocalImageStore};
use crate::init_logging_for;
use crate::jobs::JobStreamer;
use crate::metrics::{RuntimeMetrics, RuntimeMetricsStorage};
use crate::runtime::layout::FilesystemLayout;
use crate::runtime::lock::RuntimeLock;
use crate::runtime::options::{ContainerConfig, RuntimeOptions};
use crate::runtime::types::{ContainerId, ContainerInfo, RuntimeInfo};

// ============================================================================
// PUBLIC API
// ============================================================================

/// Runtime is the entry point for creating and managing containers.
///
/// **Lock Behavior**: Only one `Runtime` can use a given home directory at a
/// time. The filesystem lock is released when the last clone is dropped.
///
/// **Cloning**: cheap, all clones share the same registry. There is no
/// global instance; construct one and pass it to whoever needs it.
#[derive(Clone)]
pub struct Runtime {
    inner: RuntimeInner,
}

pub(crate) type RuntimeInner = Arc<RuntimeInnerImpl>;

pub(crate) struct RuntimeInnerImpl {
    /// Registry, protected by one lock.
    sync_state: RwLock<SynchronizedState>,

    /// Never changes after construction.
    non_sync_state: NonSynchronizedState,
}

struct SynchronizedState {
    containers: HashMap<ContainerId, Container>,
}

struct NonSynchronizedState {
    layout: FilesystemLayout,
    options: RuntimeOptions,
    images: Arc<dyn ImageStore>,
    runtime_metrics: RuntimeMetricsStorage,
    _runtime_lock: RuntimeLock,
}

impl Runtime {
    /// Create a runtime with an empty in-memory image store.
    pub fn new(options: RuntimeOptions) -> BerthResult<Self> {
        Self::with_image_store(options, Arc::new(LocalImageStore::new()))
    }

    /// Create a runtime that resolves images through `images`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `home_dir` is not absolute
    /// - Another runtime is already using the same home directory
    /// - Filesystem initialization fails
    pub fn with_image_store(
        options: RuntimeOptions,
        images: Arc<dyn ImageStore>,
    ) -> BerthResult<Self> {
        options.validate()?;

        let layout = FilesystemLayout::new(options.home_dir.clone());
        layout.prepare().map_err(|e| {
            BerthError::Storage(format!(
                "Failed to initialize filesystem at {}: {}",
                layout.home_dir().display(),
                e
            ))
        })?;

        init_logging_for(&layout)?;

        let runtime_lock = RuntimeLock::acquire(layout.home_dir())?;
        let runtime_metrics = RuntimeMetricsStorage::new();
        let containers = restore_containers(&layout, &runtime_metrics);

        tracing::debug!(
            home_dir = %layout.home_dir().display(),
            restored = containers.len(),
            "Initialized runtime"
        );

        Ok(Self {
            inner: Arc::new(RuntimeInnerImpl {
                sync_state: RwLock::new(SynchronizedState { containers }),
                non_sync_state: NonSynchronizedState {
                    layout,
                    options,
                    images,
                    runtime_metrics,
                    _runtime_lock: runtime_lock,
                },
            }),
        })
    }

    // ========================================================================
    // Registry
    // ========================================================================

    /// Create a container from `config`. The container is not started.
    pub fn create(&self, config: ContainerConfig) -> BerthResult<Container> {
        config.sanitize()?;

        let image = self
            .images()
            .resolve(&config.image)
            .ok_or_else(|| BerthError::ImageNotFound(config.image.clone()))?;

        let id = ContainerId::new();
        let container = Container::create(
            id.clone(),
            config,
            image.id,
            self.inner.non_sync_state.layout.container_layout(id.as_str()),
            self.inner.non_sync_state.runtime_metrics.clone(),
        )?;

        self.inner
            .acquire_write()?
            .containers
            .insert(id, container.clone());

        RuntimeMetricsStorage::inc(&self.inner.non_sync_state.runtime_metrics.containers_created);
        tracing::info!(
            container_id = %container.short_id(),
            image = %container.image().short(),
            "Container created"
        );
        Ok(container)
    }

    /// Look up by full id or unique id prefix.
    pub fn get(&self, id: &str) -> Option<Container> {
        self.resolve(id).ok()
    }

    /// Like [`get`](Self::get), but says why nothing was returned:
    /// `NotFound`, or `Conflict` for an ambiguous prefix.
    pub fn resolve(&self, id: &str) -> BerthResult<Container> {
        let state = self.inner.acquire_read()?;

        if let Some(container) = state.containers.get(id) {
            return Ok(container.clone());
        }
        if id.is_empty() {
            return Err(BerthError::NotFound("empty container id".into()));
        }

        let mut matches = state
            .containers
            .iter()
            .filter(|(candidate, _)| candidate.starts_with(id));

        match (matches.next(), matches.next()) {
            (Some((_, container)), None) => Ok(container.clone()),
            (None, _) => Err(BerthError::NotFound(format!("no such container: {id}"))),
            (Some(_), Some(_)) => Err(BerthError::Conflict(format!(
                "multiple containers match prefix {id}"
            ))),
        }
    }

    pub fn exists(&self, id: &str) -> bool {
        self.resolve(id).is_ok()
    }

    /// All containers, newest first.
    pub fn list(&self) -> BerthResult<Vec<ContainerInfo>> {
        let mut infos: Vec<ContainerInfo> = self
            .inner
            .acquire_read()?
            .containers
            .values()
            .map(Container::info)
            .collect();
        infos.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(infos)
    }

    pub fn len(&self) -> usize {
        self.inner
            .acquire_read()
            .map(|state| state.containers.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Version and counts of containers and images.
    pub fn info(&self) -> BerthResult<RuntimeInfo> {
        let (containers, running) = {
            let state = self.inner.acquire_read()?;
            let running = state.containers.values().filter(|c| c.is_running()).count();
            (state.containers.len(), running)
        };

        Ok(RuntimeInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            containers,
            running,
            images: self.inner.non_sync_state.images.list().len(),
        })
    }

    /// Remove a container and its writable layer.
    ///
    /// A running container is refused with `Conflict` unless `force` is set,
    /// in which case it is killed first. The registry entry goes before the
    /// files do.
    pub async fn destroy(&self, id: &str, force: bool) -> BerthResult<()> {
        let container = self.resolve(id)?;
        let key = container.id().clone();
        let inner = Arc::clone(&self.inner);

        container
            .destroy_with(force, move || {
                inner.acquire_write()?.containers.remove(&key);
                Ok(())
            })
            .await
    }

    // ========================================================================
    // Lifecycle by id
    // ========================================================================

    pub async fn start(&self, id: &str) -> BerthResult<()> {
        self.resolve(id)?.start().await
    }

    /// Stop with `timeout`, or the configured default when `None`.
    pub async fn stop(&self, id: &str, timeout: Option<Duration>) -> BerthResult<()> {
        let timeout = timeout.unwrap_or(self.inner.non_sync_state.options.default_stop_timeout);
        self.resolve(id)?.stop(timeout).await
    }

    pub async fn kill(&self, id: &str) -> BerthResult<()> {
        self.resolve(id)?.kill().await
    }

    pub async fn restart(&self, id: &str, timeout: Option<Duration>) -> BerthResult<()> {
        let timeout = timeout.unwrap_or(self.inner.non_sync_state.options.default_stop_timeout);
        self.resolve(id)?.restart(timeout).await
    }

    pub async fn wait(&self, id: &str) -> BerthResult<i32> {
        self.resolve(id)?.wait().await
    }

    /// Attach `conn` to a running container's streams.
    pub async fn attach<H: Hijack + ?Sized>(
        &self,
        id: &str,
        options: AttachOptions,
        conn: &mut H,
    ) -> BerthResult<()> {
        let container = self.resolve(id)?;
        AttachSession::new(container, options).run(conn).await
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn images(&self) -> Arc<dyn ImageStore> {
        Arc::clone(&self.inner.non_sync_state.images)
    }

    pub fn layout(&self) -> &FilesystemLayout {
        &self.inner.non_sync_state.layout
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.inner.non_sync_state.options
    }

    /// Job streamer using this runtime's write timeout and metrics.
    pub fn job_streamer(&self) -> JobStreamer {
        JobStreamer::with_metrics(
            self.inner.non_sync_state.options.stream_write_timeout,
            self.inner.non_sync_state.runtime_metrics.clone(),
        )
    }

    /// Runtime-wide counters. Lock-free.
    pub fn metrics(&self) -> RuntimeMetrics {
        RuntimeMetrics::new(self.inner.non_sync_state.runtime_metrics.clone())
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("home_dir", &self.inner.non_sync_state.layout.home_dir())
            .finish()
    }
}

// ============================================================================
// INTERNAL HELPERS
// ============================================================================

/// Load every persisted container under the home directory.
///
/// Unreadable records are skipped.
fn restore_containers(
    layout: &FilesystemLayout,
    metrics: &RuntimeMetricsStorage,
) -> HashMap<ContainerId, Container> {
    let mut containers = HashMap::new();

    let entries = match std::fs::read_dir(layout.containers_dir()) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to scan containers directory");
            return containers;
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !ContainerId::is_valid(name) {
            tracing::warn!(entry = name, "Skipping unexpected entry in containers directory");
            continue;
        }

        match Container::restore(layout.container_layout(name), metrics.clone()) {
            Ok(container) => {
                tracing::debug!(container_id = %container.short_id(), status = %container.status(), "Restored container");
                containers.insert(container.id().clone(), container);
            }
            Err(e) => {
                tracing::warn!(container = name, error = %e, "Skipping unreadable container record");
            }
        }
    }

    containers
}

// ============================================================================
// RUNTIME INNER - LOCK HELPERS ONLY
// ============================================================================

impl RuntimeInnerImpl {
    fn acquire_read(&self) -> BerthResult<std::sync::RwLockReadGuard<'_, SynchronizedState>> {
        self.sync_state.read().map_err(|e| {
            BerthError::Internal(format!("Runtime state lock poisoned (read): {}", e))
        })
    }

    fn acquire_write(&self) -> BerthResult<std::sync::RwLockWriteGuard<'_, SynchronizedState>> {
        self.sync_state.write().map_err(|e| {
            BerthError::Internal(format!("Runtime state lock poisoned (write): {}", e))
        })
    }
}
