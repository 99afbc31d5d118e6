//! Spawning container processes and signalling them.

use std::path::Path;
use std::process::Stdio;

use berth_shared::errors::{BerthError, BerthResult};
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::runtime::constants::{envs, exit};
use crate::runtime::options::ContainerConfig;
use crate::runtime::types::ContainerId;

/// Handle to a spawned container process.
///
/// Signals go to the whole process group so that children of the
/// container's main process are reached too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pid: u32,
}

impl ProcessHandle {
    pub(crate) fn new(pid: u32) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Deliver `signal` to the process group.
    ///
    /// Returns `NotRunning` when the group no longer exists.
    pub fn signal(&self, signal: Signal) -> BerthResult<()> {
        let pgid = i32::try_from(self.pid)
            .map_err(|_| BerthError::Internal(format!("pid {} out of range", self.pid)))?;

        match killpg(Pid::from_raw(pgid), signal) {
            Ok(()) => {
                tracing::debug!(pid = self.pid, ?signal, "Signalled process group");
                Ok(())
            }
            Err(Errno::ESRCH) => Err(BerthError::NotRunning(format!(
                "process group {} is gone",
                self.pid
            ))),
            Err(e) => Err(BerthError::Internal(format!(
                "failed to send {signal} to process group {}: {e}",
                self.pid
            ))),
        }
    }
}

/// How a container process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal exit with a status code.
    Code(i32),
    /// Terminated by a signal.
    Signal(i32),
}

impl ExitStatus {
    /// Shell-style exit code: signal deaths map to `128 + signo`.
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Code(c) => *c,
            ExitStatus::Signal(s) => exit::SIGNAL_EXIT_OFFSET + s,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(code), _) => ExitStatus::Code(code),
            (None, Some(signal)) => ExitStatus::Signal(signal),
            (None, None) => ExitStatus::Code(-1),
        }
    }
}

/// A freshly spawned process with its pipes.
pub(crate) struct SpawnedProcess {
    pub handle: ProcessHandle,
    pub child: Child,
    pub stdin: Option<ChildStdin>,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Start the container command inside `rw_dir`.
///
/// stdout and stderr are always piped. stdin is piped only when the config
/// asks for it, otherwise it reads from `/dev/null`.
pub(crate) fn spawn(
    id: &ContainerId,
    config: &ContainerConfig,
    rw_dir: &Path,
) -> BerthResult<SpawnedProcess> {
    let program = config
        .program()
        .ok_or_else(|| BerthError::Config("no command specified".into()))?;

    let workdir = config.workdir_in(rw_dir);
    std::fs::create_dir_all(&workdir).map_err(|e| {
        BerthError::ProcessSpawnFailed(format!(
            "failed to prepare working directory {}: {e}",
            workdir.display()
        ))
    })?;

    let mut cmd = Command::new(program);
    cmd.args(config.args())
        .current_dir(&workdir)
        .env(envs::CONTAINER_ID, id.as_str())
        .envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(if config.wants_stdin() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    if let Some(hostname) = &config.hostname {
        cmd.env("HOSTNAME", hostname);
    }

    let mut child = cmd.spawn().map_err(|e| {
        BerthError::ProcessSpawnFailed(format!("failed to start {program:?}: {e}"))
    })?;

    let pid = child.id().ok_or_else(|| {
        BerthError::ProcessSpawnFailed(format!("{program:?} exited before reporting a pid"))
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| BerthError::Internal("stdout pipe missing".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| BerthError::Internal("stderr pipe missing".into()))?;
    let stdin = child.stdin.take();

    tracing::debug!(
        container_id = %id.short(),
        pid,
        program,
        workdir = %workdir.display(),
        "Spawned container process"
    );

    Ok(SpawnedProcess {
        handle: ProcessHandle::new(pid),
        child,
        stdin,
        stdout,
        stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_exit_status_codes() {
        assert_eq!(ExitStatus::Code(0).code(), 0);
        assert!(ExitStatus::Code(0).success());
        assert_eq!(ExitStatus::Code(3).code(), 3);
        assert_eq!(ExitStatus::Signal(9).code(), 137);
        assert_eq!(ExitStatus::Signal(15).code(), 143);
        assert!(!ExitStatus::Signal(9).success());
    }

    #[tokio::test]
    async fn test_spawn_runs_in_writable_layer() {
        let temp = TempDir::new().unwrap();
        let id = ContainerId::new();
        let config = ContainerConfig::new("img", ["touch", "marker"]);

        let mut proc = spawn(&id, &config, temp.path()).unwrap();
        assert!(proc.stdin.is_none());
        let status: ExitStatus = proc.child.wait().await.unwrap().into();

        assert_eq!(status, ExitStatus::Code(0));
        assert!(temp.path().join("marker").exists());
    }

    #[tokio::test]
    async fn test_spawn_pipes_stdin_when_requested() {
        let temp = TempDir::new().unwrap();
        let mut config = ContainerConfig::new("img", ["cat"]);
        config.open_stdin = true;

        let mut proc = spawn(&ContainerId::new(), &config, temp.path()).unwrap();
        assert!(proc.stdin.is_some());
        drop(proc.stdin.take());

        let status: ExitStatus = proc.child.wait().await.unwrap().into();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_spawn_unknown_program_fails() {
        let temp = TempDir::new().unwrap();
        let config = ContainerConfig::new("img", ["/definitely/not/here"]);

        let err = spawn(&ContainerId::new(), &config, temp.path())
            .err()
            .unwrap();
        assert!(matches!(err, BerthError::ProcessSpawnFailed(_)));
    }

    #[tokio::test]
    async fn test_signal_reports_exit_by_signal() {
        let temp = TempDir::new().unwrap();
        let config = ContainerConfig::new("img", ["sleep", "30"]);

        let mut proc = spawn(&ContainerId::new(), &config, temp.path()).unwrap();
        proc.handle.signal(Signal::SIGKILL).unwrap();
        let status: ExitStatus = proc.child.wait().await.unwrap().into();

        assert_eq!(status, ExitStatus::Signal(9));
        assert_eq!(status.code(), 137);
        assert!(matches!(
            proc.handle.signal(Signal::SIGTERM),
            Err(BerthError::NotRunning(_))
        ));
    }
}
