//! Exclusive ownership of a berth home directory.
//!
//! Every container record under a home is owned by exactly one runtime. The
//! owner holds an advisory `flock` on `<home>/.lock` for its whole lifetime;
//! the kernel drops it if the process dies.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use berth_shared::errors::{BerthError, BerthResult};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

use crate::runtime::constants::filenames;

/// Held by a runtime while it owns a home directory. Unlocks on drop.
pub struct RuntimeLock {
    _flock: Flock<File>,
    path: PathBuf,
}

impl RuntimeLock {
    /// Take the lock without waiting.
    ///
    /// `Conflict` if another runtime (in this process or another) owns
    /// `home_dir`, `Storage` if the lock file cannot be opened.
    pub fn acquire(home_dir: &Path) -> BerthResult<Self> {
        let path = home_dir.join(filenames::LOCK_FILE);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                BerthError::Storage(format!("failed to open {}: {e}", path.display()))
            })?;

        let flock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => flock,
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
                return Err(BerthError::Conflict(format!(
                    "Another berth runtime is already using directory: {}",
                    home_dir.display()
                )));
            }
            Err((_, errno)) => {
                return Err(BerthError::Storage(format!(
                    "failed to lock {}: {errno}",
                    path.display()
                )));
            }
        };

        tracing::debug!(lock_path = %path.display(), "Acquired runtime lock");
        Ok(Self {
            _flock: flock,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RuntimeLock {
    fn drop(&mut self) {
        tracing::debug!(lock_path = %self.path.display(), "Releasing runtime lock");
    }
}
