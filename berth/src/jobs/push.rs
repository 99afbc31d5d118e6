use std::sync::Arc;

use async_trait::async_trait;
use berth_shared::errors::{BerthError, BerthResult};

use super::{Job, JobKind, JobOutcome, ProgressSink, RegistryClient};
use crate::images::ImageStore;

/// Upload a local image to a registry.
pub struct PushJob {
    reference: String,
    registry: Arc<dyn RegistryClient>,
    images: Arc<dyn ImageStore>,
}

impl PushJob {
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
impl Job for PushJob {
    fn kind(&self) -> JobKind {
        JobKind::Push
    }

    async fn run(self: Box<Self>, progress: ProgressSink) -> BerthResult<JobOutcome> {
        let record = self
            .images
            .resolve(&self.reference)
            .ok_or_else(|| BerthError::ImageNotFound(self.reference.clone()))?;

        progress.line("Computing checksum");
        self.registry.push(&record, &progress).await?;
        progress.line(format!(
            "Pushed {} to {}",
            record.reference(),
            self.registry.endpoint()
        ));

        Ok(JobOutcome::image(record.id))
    }
}
