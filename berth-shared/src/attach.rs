//! Attach request parameters.

use serde::{Deserialize, Serialize};

/// Which standard streams an attach session splices.
///
/// Mirrors the `stdin`/`stdout`/`stderr`/`stream` request flags. Any flag
/// missing from a deserialized request defaults to `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachOptions {
    /// Forward client bytes to the container's stdin.
    pub stdin: bool,
    /// Forward container stdout to the client.
    pub stdout: bool,
    /// Forward container stderr to the client.
    pub stderr: bool,
    /// Stream live I/O. When false the session ends right after the hijack.
    pub stream: bool,
}

impl AttachOptions {
    /// All three streams, live.
    pub fn all() -> Self {
        Self {
            stdin: true,
            stdout: true,
            stderr: true,
            stream: true,
        }
    }

    /// True when at least one direction was requested.
    pub fn any_stream(&self) -> bool {
        self.stdin || self.stdout || self.stderr
    }
}
