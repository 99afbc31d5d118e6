use std::sync::Arc;

use async_trait::async_trait;
use berth_shared::errors::BerthResult;

use super::{Job, JobKind, JobOutcome, ProgressSink};
use crate::images::{ImageRecord, ImageStore};

/// Transfers images to and from a registry.
///
/// The wire protocol lives behind this trait; jobs only sequence calls and
/// report progress.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Where the registry lives, for progress messages.
    fn endpoint(&self) -> String;

    /// Fetch `reference` and return the metadata of the fetched image.
    async fn pull(&self, reference: &str, progress: &ProgressSink) -> BerthResult<ImageRecord>;

    /// Upload the image `image`.
    async fn push(&self, image: &ImageRecord, progress: &ProgressSink) -> BerthResult<()>;
}

/// Fetch an image from a registry into the local image store.
pub struct PullJob {
    reference: String,
    registry: Arc<dyn RegistryClient>,
    images: Arc<dyn ImageStore>,
}

impl PullJob {
    pub fn new(
        reference: impl Into<String>,
        registry: Arc<dyn RegistryClient>,
        images: Arc<dyn ImageStore>,
    ) -> Self {
        Self {
            reference: reference.into(),
            registry,
            images,
        }
    }
}

#[async_trait]
impl Job for PullJob {
    fn kind(&self) -> JobKind {
        JobKind::Pull
    }

    async fn run(self: Box<Self>, progress: ProgressSink) -> BerthResult<JobOutcome> {
        progress.line(format!(
            "Pulling repository {} from {}",
            self.reference,
            self.registry.endpoint()
        ));

        let record = self.registry.pull(&self.reference, &progress).await?;
        let id = record.id.clone();
        progress.line(format!("Pulled {} ({})", record.reference(), id.short()));
        self.images.insert(record);

        Ok(JobOutcome::image(id))
    }
}
