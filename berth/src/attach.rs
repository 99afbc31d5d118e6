//! Attach sessions: splicing a hijacked client connection onto a running
//! container's standard streams.
//!
//! Output is written to the client as raw bytes with no framing; stdout and
//! stderr share the one connection. Input from the client goes to the
//! container's stdin. What happens when the client's input ends depends on
//! the container's `open_stdin` setting:
//!
//! - `open_stdin == false`: the container's stdin is closed, so the process
//!   sees end-of-input.
//! - `open_stdin == true`: stdin stays open for a later session and this
//!   session detaches, leaving the process running.
//!
//! A client whose input ended is treated as gone. Output still flows for
//! [`CLIENT_HANGUP_GRACE`] so a process reacting to end-of-input can finish,
//! then the session detaches even if the process never writes again.

use std::sync::Arc;

use berth_shared::AttachOptions;
use berth_shared::errors::{BerthError, BerthResult};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::container::{Container, ContainerIo, OutputKind, OutputSubscription};
use crate::hijack::{BoxedReader, BoxedWriter, Hijack, RawStream, StreamHijacker};
use crate::runtime::constants::buffers;
use crate::runtime::constants::timeouts::CLIENT_HANGUP_GRACE;

type SharedWriter = Arc<Mutex<BoxedWriter>>;

/// One client attached to one container.
pub struct AttachSession {
    container: Container,
    options: AttachOptions,
}

impl AttachSession {
    pub fn new(container: Container, options: AttachOptions) -> Self {
        Self { container, options }
    }

    /// Hijack `conn` and stream until the session ends.
    ///
    /// Fails only before the hijack: `NotRunning` when the container is not
    /// running, or the hijack error. Everything after that is contained in
    /// the session and logged.
    pub async fn run<H: Hijack + ?Sized>(self, conn: &mut H) -> BerthResult<()> {
        if !self.container.status().can_attach() {
            return Err(BerthError::NotRunning(format!(
                "cannot attach to container {}",
                self.container.short_id()
            )));
        }

        let raw = StreamHijacker::hijack(conn).await?;

        if !self.options.stream || !self.options.any_stream() {
            tracing::debug!(container_id = %self.container.short_id(), "Nothing to stream, closing");
            return Ok(());
        }

        self.splice(raw).await;
        Ok(())
    }

    async fn splice(self, raw: RawStream) {
        let container_id = self.container.short_id().to_string();
        let Some(io) = self.container.io() else {
            tracing::debug!(container_id = %container_id, "No conduits to attach to");
            return;
        };

        // Outputs are subscribed before any input is forwarded, so nothing
        // the process prints in response to that input is missed.
        let mut subscriptions = Vec::new();
        if self.options.stdout {
            subscriptions.extend(io.subscribe(OutputKind::Stdout));
        }
        if self.options.stderr {
            subscriptions.extend(io.subscribe(OutputKind::Stderr));
        }

        let (reader, writer) = raw.into_split();
        let writer: SharedWriter = Arc::new(Mutex::new(writer));
        let detach = CancellationToken::new();

        let mut outputs = JoinSet::new();
        let has_outputs = !subscriptions.is_empty();
        for sub in subscriptions {
            outputs.spawn(forward_output(sub, writer.clone(), detach.clone()));
        }

        let stdin = if self.options.stdin && io.has_stdin().await {
            Some(io.clone())
        } else {
            None
        };
        let has_stdin = stdin.is_some();
        let input = tokio::spawn(forward_input(
            reader,
            stdin,
            self.container.config().open_stdin,
            detach.clone(),
        ));

        tracing::debug!(
            container_id = %container_id,
            stdin = has_stdin,
            outputs = has_outputs,
            "Attach session started"
        );

        if has_outputs {
            while let Some(result) = outputs.join_next().await {
                if let Err(e) = result {
                    tracing::debug!(error = %e, "Attach output task failed");
                }
            }
        } else {
            tokio::select! {
                _ = self.container.wait() => {}
                _ = detach.cancelled() => {}
            }
        }

        detach.cancel();
        if let Err(e) = input.await {
            tracing::debug!(error = %e, "Attach input task failed");
        }

        let _ = writer.lock().await.shutdown().await;
        tracing::debug!(container_id = %container_id, "Attach session ended");
    }
}

/// Copy one output conduit to the client until it ends, the client goes
/// away, or the session detaches.
async fn forward_output(mut sub: OutputSubscription, writer: SharedWriter, detach: CancellationToken) {
    loop {
        let chunk = tokio::select! {
            _ = detach.cancelled() => return,
            chunk = sub.recv() => chunk,
        };
        let Some(chunk) = chunk else {
            return;
        };

        let write = async {
            let mut w = writer.lock().await;
            w.write_all(&chunk).await?;
            w.flush().await
        };

        let result = tokio::select! {
            _ = detach.cancelled() => return,
            result = write => result,
        };

        if let Err(e) = result {
            tracing::debug!(stream = sub.kind().as_str(), error = %e, "Attach client went away");
            detach.cancel();
            return;
        }
    }
}

/// Copy client input to the container's stdin until the client's input
/// ends. Without `stdin` the input is read and dropped, only to notice the
/// client going away.
async fn forward_input(
    mut reader: BoxedReader,
    stdin: Option<Arc<ContainerIo>>,
    open_stdin: bool,
    detach: CancellationToken,
) {
    let mut buf = vec![0u8; buffers::COPY_CHUNK_SIZE];
    loop {
        let read = tokio::select! {
            _ = detach.cancelled() => return,
            read = reader.read(&mut buf) => read,
        };

        match read {
            Ok(0) => break,
            Ok(n) => {
                let Some(io) = &stdin else { continue };
                if let Err(e) = io.write_stdin(&buf[..n]).await {
                    tracing::debug!(error = %e, "Container stdin no longer accepts input");
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Attach client input failed");
                break;
            }
        }
    }

    match stdin {
        Some(_) if open_stdin => {
            detach.cancel();
            return;
        }
        Some(io) => io.close_stdin().await,
        None => {}
    }

    tokio::select! {
        _ = detach.cancelled() => {}
        _ = tokio::time::sleep(CLIENT_HANGUP_GRACE) => {
            tracing::debug!("Attach client input ended, detaching");
            detach.cancel();
        }
    }
}
