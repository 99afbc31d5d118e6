use crate::runtime::constants::filenames;
use berth_shared::errors::{BerthError, BerthResult};
use std::path::{Path, PathBuf};

/// Directory structure constants
pub mod dirs {
    /// Base directory name for berth data
    pub const BERTH_DIR: &str = ".berth";

    /// Subdirectory holding one directory per container
    pub const CONTAINERS_DIR: &str = "containers";

    /// Per-container writable layer
    pub const RW_DIR: &str = "rw";

    /// Subdirectory for log files
    pub const LOGS_DIR: &str = "logs";
}

// ============================================================================
// FILESYSTEM LAYOUT (home directory)
// ============================================================================

#[derive(Clone, Debug)]
pub struct FilesystemLayout {
    home_dir: PathBuf,
}

impl FilesystemLayout {
    pub fn new(home_dir: PathBuf) -> Self {
        Self { home_dir }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    /// Root directory for all containers: ~/.berth/containers
    pub fn containers_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::CONTAINERS_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::LOGS_DIR)
    }

    /// Initialize the filesystem structure.
    pub fn prepare(&self) -> BerthResult<()> {
        std::fs::create_dir_all(&self.home_dir)
            .map_err(|e| BerthError::Storage(format!("failed to create home: {e}")))?;

        std::fs::create_dir_all(self.containers_dir())
            .map_err(|e| BerthError::Storage(format!("failed to create containers dir: {e}")))?;

        std::fs::create_dir_all(self.logs_dir())
            .map_err(|e| BerthError::Storage(format!("failed to create logs dir: {e}")))?;

        Ok(())
    }

    /// Layout of a single container directory.
    pub fn container_layout(&self, container_id: &str) -> ContainerLayout {
        ContainerLayout::new(filenames::container_home(&self.home_dir, container_id))
    }
}

// ============================================================================
// CONTAINER LAYOUT (per-container directory)
// ============================================================================

/// Filesystem layout for a single container directory.
///
/// ```text
/// containers/<id>/
/// ├── config.json   persisted config + state record
/// └── rw/           writable layer, working directory of the process
/// ```
#[derive(Clone, Debug)]
pub struct ContainerLayout {
    root: PathBuf,
}

impl ContainerLayout {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writable layer: containers/<id>/rw
    pub fn rw_dir(&self) -> PathBuf {
        self.root.join(dirs::RW_DIR)
    }

    /// Persisted record: containers/<id>/config.json
    pub fn record_path(&self) -> PathBuf {
        self.root.join(filenames::CONTAINER_RECORD)
    }

    /// Create the container home and its writable layer.
    pub fn prepare(&self) -> BerthResult<()> {
        std::fs::create_dir_all(self.rw_dir()).map_err(|e| {
            BerthError::Storage(format!(
                "failed to create writable layer {}: {e}",
                self.rw_dir().display()
            ))
        })
    }

    /// Release the writable layer and everything else under the container home.
    ///
    /// Missing directories are not an error.
    pub fn release(&self) -> BerthResult<()> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BerthError::Storage(format!(
                "failed to remove {}: {e}",
                self.root.display()
            ))),
        }
    }
}
