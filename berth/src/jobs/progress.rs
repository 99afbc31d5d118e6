//! Progress reporting from a job to its (optional) subscriber.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::hijack::BoxedWriter;
use crate::runtime::constants::stream;

/// Where a job reports progress.
///
/// Reporting never blocks and never fails from the job's point of view:
/// lines for a subscriber that went away are dropped.
#[derive(Clone, Debug)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

impl ProgressSink {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink nobody reads. For running jobs without a client.
    pub fn discard() -> Self {
        Self { tx: None }
    }

    /// Report one line of progress. The terminator is added on delivery.
    pub fn line(&self, msg: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(msg.into());
        }
    }
}

/// Write progress lines to the subscriber until every sink is gone.
///
/// A failed write, or one that takes longer than `write_timeout`, detaches
/// the subscriber. Later lines are still drained from the channel so the
/// job never notices.
pub(crate) async fn deliver(
    mut rx: mpsc::UnboundedReceiver<String>,
    writer: BoxedWriter,
    write_timeout: Duration,
) {
    let mut writer = Some(writer);
    let mut discarded = 0usize;

    while let Some(line) = rx.recv().await {
        let Some(w) = writer.as_mut() else {
            discarded += 1;
            continue;
        };

        let mut bytes = line.into_bytes();
        bytes.push(stream::PROGRESS_LINE_END);

        let write = async {
            w.write_all(&bytes).await?;
            w.flush().await
        };

        let detach_reason = match tokio::time::timeout(write_timeout, write).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("write exceeded {write_timeout:?}")),
        };

        if let Some(reason) = detach_reason {
            tracing::debug!(reason = %reason, "Job subscriber detached");
            writer = None;
        }
    }

    match writer {
        Some(mut w) => {
            let _ = w.shutdown().await;
        }
        None => {
            tracing::debug!(discarded, "Discarded progress after subscriber detached");
        }
    }
}
