//! Image metadata contract.
//!
//! The engine only needs to resolve an image reference to an id when a
//! container is created, and jobs register the images they produce. How
//! images are stored on disk belongs to whoever implements [`ImageStore`].
//!
//! One image id can be known under several `name:tag` references; a
//! reference names exactly one image at a time.

mod store;

pub use store::LocalImageStore;

use berth_shared::errors::BerthResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runtime::types::ImageId;

/// Tag assumed when a reference names no tag.
pub const DEFAULT_TAG: &str = "latest";

/// Name and tag of an image that no reference points to.
pub const UNTAGGED: &str = "<none>";

/// Metadata of one image.
///
/// `name` and `tag` are the reference the record was looked up through, or
/// the image's primary reference when it was looked up by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: ImageId,
    pub name: String,
    pub tag: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl ImageRecord {
    /// Record for a new image called `reference` (`name` or `name:tag`).
    pub fn new(id: ImageId, reference: &str) -> Self {
        let (name, tag) = split_reference(reference);
        Self {
            id,
            name: name.to_string(),
            tag: tag.to_string(),
            created_at: Utc::now(),
            comment: None,
        }
    }

    /// Record for an image no reference points to yet.
    pub fn untagged(id: ImageId) -> Self {
        let mut record = Self::new(id, UNTAGGED);
        record.tag = UNTAGGED.to_string();
        record
    }

    pub fn is_tagged(&self) -> bool {
        self.name != UNTAGGED
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// `name:tag`
    pub fn reference(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }
}

/// Split `name[:tag]` into name and tag, defaulting the tag.
///
/// A colon inside a registry host (`localhost:5000/app`) is not a tag
/// separator.
pub fn split_reference(reference: &str) -> (&str, &str) {
    match reference.rfind(':') {
        Some(idx) if !reference[idx + 1..].contains('/') => {
            (&reference[..idx], &reference[idx + 1..])
        }
        _ => (reference, DEFAULT_TAG),
    }
}

/// Lookup and registration of image metadata.
pub trait ImageStore: Send + Sync {
    /// Resolve by full id, `name:tag`, bare `name` (meaning `name:latest`),
    /// or a unique id prefix.
    fn resolve(&self, reference: &str) -> Option<ImageRecord>;

    /// Register an image under `record.reference()`.
    ///
    /// An id already known keeps its metadata and gains the reference. The
    /// reference moves off whichever image it named before.
    fn insert(&self, record: ImageRecord);

    /// Add `repo:tag` as a further reference to the image `reference`
    /// resolves to. An empty `tag` means [`DEFAULT_TAG`].
    fn tag(&self, reference: &str, repo: &str, tag: &str) -> BerthResult<ImageRecord>;

    /// Remove `reference`.
    ///
    /// By name, while the image has other references, only that reference
    /// goes. By id, or by its last reference, the image goes.
    fn remove(&self, reference: &str) -> Option<ImageRecord>;

    /// One record per image under its primary reference, newest first.
    fn list(&self) -> Vec<ImageRecord>;
}
