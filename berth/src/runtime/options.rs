//! Configuration for the berth runtime and its containers.

use crate::runtime::constants::{envs as const_envs, limits, timeouts};
use crate::runtime::layout::dirs as const_dirs;
use crate::runtime::types::Bytes;
use berth_shared::errors::{BerthError, BerthResult};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Runtime Options
// ============================================================================

/// Options used when constructing a [`Runtime`](crate::runtime::Runtime).
#[derive(Clone, Debug)]
pub struct RuntimeOptions {
    /// Root of all runtime state. Must be absolute.
    pub home_dir: PathBuf,

    /// Graceful phase used by `stop()` callers that do not pass a timeout.
    pub default_stop_timeout: Duration,

    /// Upper bound for a single progress write to a job subscriber.
    pub stream_write_timeout: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        let home_dir = std::env::var(const_envs::BERTH_HOME)
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let mut path = home_dir().unwrap_or_else(|| PathBuf::from("."));
                path.push(const_dirs::BERTH_DIR);
                path
            });

        Self {
            home_dir,
            default_stop_timeout: timeouts::DEFAULT_STOP_TIMEOUT,
            stream_write_timeout: timeouts::DEFAULT_STREAM_WRITE_TIMEOUT,
        }
    }
}

impl RuntimeOptions {
    /// Options rooted at `home_dir`, everything else defaulted.
    pub fn with_home(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
            ..Default::default()
        }
    }

    pub(crate) fn validate(&self) -> BerthResult<()> {
        if !self.home_dir.is_absolute() {
            return Err(BerthError::Config(format!(
                "home_dir must be an absolute path, got {}",
                self.home_dir.display()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Container Config
// ============================================================================

/// Immutable creation-time configuration of a container.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Image reference: id, id prefix, `name` or `name:tag`.
    pub image: String,

    /// Program followed by its arguments.
    pub cmd: Vec<String>,

    /// Extra environment, `(key, value)` pairs.
    #[serde(default)]
    pub env: Vec<(String, String)>,

    /// Working directory relative to the writable layer.
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Memory limit. Validated and recorded; enforcement belongs to the
    /// isolation layer that executes the container.
    #[serde(default)]
    pub memory: Option<Bytes>,

    /// Keep stdin open after an attached client disconnects.
    #[serde(default)]
    pub open_stdin: bool,

    #[serde(default)]
    pub attach_stdin: bool,

    #[serde(default)]
    pub attach_stdout: bool,

    #[serde(default)]
    pub attach_stderr: bool,

    #[serde(default)]
    pub hostname: Option<String>,
}

impl ContainerConfig {
    /// Config running `cmd` from `image` with all other settings defaulted.
    pub fn new<I, S>(image: impl Into<String>, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            image: image.into(),
            cmd: cmd.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Whether the process gets a stdin pipe at all.
    pub fn wants_stdin(&self) -> bool {
        self.open_stdin || self.attach_stdin
    }

    pub fn program(&self) -> Option<&str> {
        self.cmd.first().map(String::as_str)
    }

    pub fn args(&self) -> &[String] {
        self.cmd.get(1..).unwrap_or(&[])
    }

    /// Validate the config before a container is created from it.
    pub fn sanitize(&self) -> BerthResult<()> {
        match self.program() {
            None => return Err(BerthError::Config("no command specified".into())),
            Some(p) if p.trim().is_empty() => {
                return Err(BerthError::Config("command must not be empty".into()));
            }
            Some(_) => {}
        }

        if self.image.trim().is_empty() {
            return Err(BerthError::Config("no image specified".into()));
        }

        if let Some(memory) = self.memory
            && memory.as_bytes() < limits::MIN_MEMORY_BYTES
        {
            return Err(BerthError::Config(format!(
                "minimum memory limit is {}, got {}",
                Bytes::from_bytes(limits::MIN_MEMORY_BYTES),
                memory
            )));
        }

        if let Some(dir) = &self.working_dir
            && Path::new(dir)
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(BerthError::Config(format!(
                "working_dir must stay inside the container: {dir}"
            )));
        }

        for (key, _) in &self.env {
            if key.is_empty() || key.contains('=') {
                return Err(BerthError::Config(format!(
                    "invalid environment variable name: {key:?}"
                )));
            }
        }

        Ok(())
    }

    /// Resolve the working directory beneath `rw_dir`.
    pub(crate) fn workdir_in(&self, rw_dir: &Path) -> PathBuf {
        match &self.working_dir {
            Some(dir) => rw_dir.join(dir.trim_start_matches('/')),
            None => rw_dir.to_path_buf(),
        }
    }
}
