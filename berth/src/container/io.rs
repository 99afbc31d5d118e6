//! Per-run I/O conduits between a container process and attached clients.
//!
//! Each `start()` creates a fresh [`ContainerIo`]. Output is pumped from the
//! child's pipes into broadcast channels so any number of attach sessions can
//! follow it. The monitor closes the conduits after the process exits.

use std::sync::Arc;
use std::time::Duration;

use berth_shared::errors::{BerthError, BerthResult};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::runtime::constants::buffers;

/// Which output stream of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Stdout,
    Stderr,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Stdout => "stdout",
            OutputKind::Stderr => "stderr",
        }
    }
}

/// Receiving end of one output conduit.
pub struct OutputSubscription {
    kind: OutputKind,
    rx: broadcast::Receiver<Vec<u8>>,
}

impl OutputSubscription {
    pub fn kind(&self) -> OutputKind {
        self.kind
    }

    /// Next chunk of output, or `None` once the conduit is closed and
    /// everything buffered has been delivered.
    ///
    /// A subscriber that falls too far behind skips the chunks it missed.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.rx.recv().await {
                Ok(chunk) => return Some(chunk),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(stream = self.kind.as_str(), skipped, "Output subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

struct OutputConduit {
    kind: OutputKind,
    sender: Mutex<Option<broadcast::Sender<Vec<u8>>>>,
}

impl OutputConduit {
    fn new(kind: OutputKind) -> (Self, broadcast::Sender<Vec<u8>>) {
        let (tx, _) = broadcast::channel(buffers::OUTPUT_BROADCAST_CAPACITY);
        let conduit = Self {
            kind,
            sender: Mutex::new(Some(tx.clone())),
        };
        (conduit, tx)
    }

    fn subscribe(&self) -> Option<OutputSubscription> {
        self.sender.lock().as_ref().map(|tx| OutputSubscription {
            kind: self.kind,
            rx: tx.subscribe(),
        })
    }

    fn close(&self) {
        self.sender.lock().take();
    }
}

/// I/O conduits of one container run.
pub struct ContainerIo {
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    stdout: OutputConduit,
    stderr: OutputConduit,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl ContainerIo {
    /// Wire up conduits for a freshly spawned process and start pumping
    /// its output.
    pub(crate) fn new<O, E>(stdin: Option<ChildStdin>, stdout: O, stderr: E) -> Arc<Self>
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let (out_conduit, out_tx) = OutputConduit::new(OutputKind::Stdout);
        let (err_conduit, err_tx) = OutputConduit::new(OutputKind::Stderr);

        let pumps = vec![
            tokio::spawn(pump(OutputKind::Stdout, stdout, out_tx)),
            tokio::spawn(pump(OutputKind::Stderr, stderr, err_tx)),
        ];

        Arc::new(Self {
            stdin: tokio::sync::Mutex::new(stdin),
            stdout: out_conduit,
            stderr: err_conduit,
            pumps: Mutex::new(pumps),
        })
    }

    /// Follow one output stream. `None` once the conduit is closed.
    pub fn subscribe(&self, kind: OutputKind) -> Option<OutputSubscription> {
        match kind {
            OutputKind::Stdout => self.stdout.subscribe(),
            OutputKind::Stderr => self.stderr.subscribe(),
        }
    }

    pub async fn has_stdin(&self) -> bool {
        self.stdin.lock().await.is_some()
    }

    /// Forward `data` to the process's stdin.
    pub async fn write_stdin(&self, data: &[u8]) -> BerthResult<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| BerthError::Io("stdin is closed".into()))?;
        stdin.write_all(data).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Signal end-of-input to the process. Idempotent.
    pub async fn close_stdin(&self) {
        if let Some(mut stdin) = self.stdin.lock().await.take() {
            let _ = stdin.shutdown().await;
            tracing::trace!("Closed container stdin");
        }
    }

    /// Close every conduit after the process exited.
    ///
    /// Pumps get `drain_grace` to forward what is left in the pipes; a pipe
    /// held open by a surviving grandchild is cut off after that. Subscribers
    /// then receive what is buffered followed by end-of-stream.
    pub(crate) async fn close(&self, drain_grace: Duration) {
        let pumps: Vec<_> = std::mem::take(&mut *self.pumps.lock());
        let deadline = tokio::time::Instant::now() + drain_grace;

        for mut pump in pumps {
            if tokio::time::timeout_at(deadline, &mut pump).await.is_err() {
                tracing::debug!("Output pump did not drain in time, aborting");
                pump.abort();
                let _ = pump.await;
            }
        }

        self.stdout.close();
        self.stderr.close();
        self.close_stdin().await;
    }
}

async fn pump<R>(kind: OutputKind, mut reader: R, tx: broadcast::Sender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; buffers::COPY_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                // No subscriber is not an error: the pipe still has to be drained.
                let _ = tx.send(buf[..n].to_vec());
            }
            Err(e) => {
                tracing::debug!(stream = kind.as_str(), error = %e, "Output pipe read failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, duplex};

    async fn collect(mut sub: OutputSubscription) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = sub.recv().await {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn test_subscriber_sees_output_then_end_of_stream() {
        let (mut out_w, out_r) = duplex(64);
        let (_err_w, err_r) = duplex(64);
        let io = ContainerIo::new(None, out_r, err_r);

        let sub = io.subscribe(OutputKind::Stdout).unwrap();
        out_w.write_all(b"hello").await.unwrap();
        drop(out_w);

        let reader = tokio::spawn(collect(sub));
        io.close(Duration::from_millis(200)).await;

        assert_eq!(reader.await.unwrap(), b"hello");
        assert!(io.subscribe(OutputKind::Stdout).is_none());
        assert!(io.subscribe(OutputKind::Stderr).is_none());
    }

    #[tokio::test]
    async fn test_close_cuts_off_pipe_held_open() {
        let (_out_w, out_r) = duplex(64);
        let (_err_w, err_r) = duplex(64);
        let io = ContainerIo::new(None, out_r, err_r);
        let sub = io.subscribe(OutputKind::Stderr).unwrap();

        tokio::time::timeout(Duration::from_secs(2), io.close(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(collect(sub).await.is_empty());
    }

    #[tokio::test]
    async fn test_write_without_stdin_fails() {
        let (_out_w, out_r) = duplex(64);
        let (_err_w, err_r) = duplex(64);
        let io = ContainerIo::new(None, out_r, err_r);

        assert!(!io.has_stdin().await);
        assert!(matches!(
            io.write_stdin(b"x").await,
            Err(BerthError::Io(_))
        ));
    }
}
