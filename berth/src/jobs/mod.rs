//! Long-running jobs streamed to a hijacked connection.
//!
//! A job runs in its own task and reports through a [`ProgressSink`]. A
//! separate delivery task writes the progress to the client. The client can
//! disconnect at any time; the job still runs to completion.

mod build;
mod progress;
mod pull;
mod push;

pub use build::{BuildBackend, BuildJob, Instruction};
pub use progress::ProgressSink;
pub use pull::{PullJob, RegistryClient};
pub use push::PushJob;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use berth_shared::errors::{BerthError, BerthResult};
use tokio::task::JoinHandle;
use ulid::Ulid;

use crate::hijack::{BoxedReader, Hijack, StreamHijacker};
use crate::metrics::RuntimeMetricsStorage;
use crate::runtime::constants::timeouts;
use crate::runtime::types::ImageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Pull,
    Push,
    Build,
    Other(&'static str),
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Pull => f.write_str("pull"),
            JobKind::Push => f.write_str("push"),
            JobKind::Build => f.write_str("build"),
            JobKind::Other(name) => f.write_str(name),
        }
    }
}

/// Result of a finished job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutcome {
    /// Image the job produced or fetched, if any.
    pub image: Option<ImageId>,
}

impl JobOutcome {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn image(id: ImageId) -> Self {
        Self { image: Some(id) }
    }
}

#[async_trait]
pub trait Job: Send + 'static {
    fn kind(&self) -> JobKind;

    /// Offered the client's half of the hijacked stream before the job is
    /// spawned. Jobs that take no client input ignore it.
    fn accept_input(&mut self, _input: BoxedReader) {}

    async fn run(self: Box<Self>, progress: ProgressSink) -> BerthResult<JobOutcome>;
}

/// Handle to a started job.
pub struct JobHandle {
    id: Ulid,
    kind: JobKind,
    job: JoinHandle<BerthResult<JobOutcome>>,
    delivery: Option<JoinHandle<()>>,
}

impl JobHandle {
    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn is_finished(&self) -> bool {
        self.job.is_finished()
    }

    /// True once the progress stream has been shut down or abandoned.
    pub fn delivery_finished(&self) -> bool {
        self.delivery.as_ref().is_none_or(|d| d.is_finished())
    }

    /// Wait for the delivery task to finish writing to the subscriber.
    pub async fn wait_delivery(&mut self) {
        if let Some(delivery) = self.delivery.take() {
            let _ = delivery.await;
        }
    }

    /// Wait for the job itself. Independent of the subscriber.
    pub async fn wait(self) -> BerthResult<JobOutcome> {
        self.job
            .await
            .map_err(|e| BerthError::Internal(format!("job task failed: {e}")))?
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Runs jobs against hijacked connections.
#[derive(Clone, Debug)]
pub struct JobStreamer {
    write_timeout: Duration,
    metrics: RuntimeMetricsStorage,
}

impl Default for JobStreamer {
    fn default() -> Self {
        Self::new(timeouts::DEFAULT_STREAM_WRITE_TIMEOUT)
    }
}

impl JobStreamer {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            write_timeout,
            metrics: RuntimeMetricsStorage::new(),
        }
    }

    pub(crate) fn with_metrics(write_timeout: Duration, metrics: RuntimeMetricsStorage) -> Self {
        Self {
            write_timeout,
            metrics,
        }
    }

    /// Hijack `conn`, acknowledge, and start `job` in the background.
    ///
    /// If the hijack fails the job never starts.
    pub async fn start<H, J>(&self, conn: &mut H, mut job: J) -> BerthResult<JobHandle>
    where
        H: Hijack + ?Sized,
        J: Job,
    {
        let raw = StreamHijacker::hijack(conn).await?;
        let (reader, writer) = raw.into_split();
        job.accept_input(reader);

        let id = Ulid::new();
        let kind = job.kind();
        let (sink, rx) = ProgressSink::channel();

        let delivery = tokio::spawn(progress::deliver(rx, writer, self.write_timeout));

        let metrics = self.metrics.clone();
        RuntimeMetricsStorage::inc(&metrics.jobs_started);
        tracing::info!(job_id = %id, kind = %kind, "Job started");

        let job = tokio::spawn(async move {
            let result = Box::new(job).run(sink.clone()).await;
            match &result {
                Ok(_) => {
                    RuntimeMetricsStorage::inc(&metrics.jobs_completed);
                    tracing::info!(job_id = %id, kind = %kind, "Job completed");
                }
                Err(e) => {
                    sink.line(format!("Error: {e}"));
                    RuntimeMetricsStorage::inc(&metrics.jobs_failed);
                    tracing::warn!(job_id = %id, kind = %kind, error = %e, "Job failed");
                }
            }
            result
        });

        Ok(JobHandle {
            id,
            kind,
            job,
            delivery: Some(delivery),
        })
    }

    /// Start `job` and return once it has finished, whether or not the
    /// client stayed connected.
    pub async fn run<H, J>(&self, conn: &mut H, job: J) -> BerthResult<JobOutcome>
    where
        H: Hijack + ?Sized,
        J: Job,
    {
        self.start(conn, job).await?.wait().await
    }
}
