use std::collections::HashMap;

use berth_shared::errors::{BerthError, BerthResult};
use parking_lot::RwLock;

use super::{DEFAULT_TAG, ImageRecord, ImageStore, UNTAGGED, split_reference};
use crate::runtime::types::ImageId;

/// In-memory image metadata store.
#[derive(Default)]
pub struct LocalImageStore {
    index: RwLock<Index>,
}

#[derive(Default)]
struct Index {
    /// Keyed by full id. `name`/`tag` hold the primary reference.
    images: HashMap<String, ImageRecord>,
    /// `name:tag` to the image it names.
    references: HashMap<String, ImageId>,
}

impl LocalImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `records`.
    pub fn with_images(records: impl IntoIterator<Item = ImageRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    /// Every `name:tag` pointing at `id`, sorted.
    pub fn references(&self, id: &ImageId) -> Vec<String> {
        self.index.read().references_of(id)
    }
}

fn normalize(reference: &str) -> String {
    let (name, tag) = split_reference(reference);
    format!("{name}:{tag}")
}

/// `record` as seen through `reference`.
fn view(mut record: ImageRecord, reference: Option<&str>) -> ImageRecord {
    if let Some(reference) = reference {
        let (name, tag) = split_reference(reference);
        record.name = name.to_string();
        record.tag = tag.to_string();
    }
    record
}

impl Index {
    /// The image `reference` names, and the `name:tag` it matched, if any.
    fn lookup(&self, reference: &str) -> Option<(ImageRecord, Option<String>)> {
        if let Some(record) = self.images.get(reference) {
            return Some((record.clone(), None));
        }

        let key = normalize(reference);
        if let Some(id) = self.references.get(&key)
            && let Some(record) = self.images.get(id.as_str())
        {
            return Some((record.clone(), Some(key)));
        }

        if reference.is_empty() || !reference.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let mut matches = self
            .images
            .values()
            .filter(|r| r.id.as_str().starts_with(reference));
        match (matches.next(), matches.next()) {
            (Some(record), None) => Some((record.clone(), None)),
            _ => None,
        }
    }

    fn references_of(&self, id: &ImageId) -> Vec<String> {
        let mut refs: Vec<String> = self
            .references
            .iter()
            .filter(|(_, target)| *target == id)
            .map(|(key, _)| key.clone())
            .collect();
        refs.sort();
        refs
    }

    fn set_primary(&mut self, id: &ImageId, reference: Option<&str>) {
        if let Some(record) = self.images.get_mut(id.as_str()) {
            let (name, tag) = reference.map(split_reference).unwrap_or((UNTAGGED, UNTAGGED));
            record.name = name.to_string();
            record.tag = tag.to_string();
        }
    }

    /// Point `key` at `id`, taking it away from any other image.
    fn add_reference(&mut self, key: String, id: &ImageId) {
        if let Some(previous) = self.references.insert(key.clone(), id.clone())
            && previous != *id
        {
            self.unlink(&previous, &key);
        }
        if self.images.get(id.as_str()).is_some_and(|r| !r.is_tagged()) {
            self.set_primary(id, Some(&key));
        }
    }

    /// `key` no longer names `id`. Its primary falls back to another
    /// reference, or to untagged.
    fn unlink(&mut self, id: &ImageId, key: &str) {
        let was_primary = self
            .images
            .get(id.as_str())
            .is_some_and(|r| r.reference() == key);
        if was_primary {
            let next = self.references_of(id).into_iter().next();
            self.set_primary(id, next.as_deref());
        }
    }
}

impl ImageStore for LocalImageStore {
    fn resolve(&self, reference: &str) -> Option<ImageRecord> {
        let (record, matched) = self.index.read().lookup(reference)?;
        Some(view(record, matched.as_deref()))
    }

    fn insert(&self, record: ImageRecord) {
        let mut index = self.index.write();
        let key = record.is_tagged().then(|| record.reference());

        tracing::debug!(image = %record.reference(), id = %record.id.short(), "Registered image");
        index
            .images
            .entry(record.id.as_str().to_string())
            .or_insert_with(|| {
                let mut stored = record.clone();
                stored.name = UNTAGGED.to_string();
                stored.tag = UNTAGGED.to_string();
                stored
            });

        if let Some(key) = key {
            index.add_reference(key, &record.id);
        }
    }

    fn tag(&self, reference: &str, repo: &str, tag: &str) -> BerthResult<ImageRecord> {
        if repo.is_empty() || repo.contains(char::is_whitespace) || split_reference(repo).0 != repo {
            return Err(BerthError::Config(format!("invalid repository name: {repo:?}")));
        }
        if tag.contains([':', '/']) || tag.contains(char::is_whitespace) {
            return Err(BerthError::Config(format!("invalid tag: {tag:?}")));
        }
        let tag = if tag.is_empty() { DEFAULT_TAG } else { tag };

        let mut index = self.index.write();
        let (record, _) = index
            .lookup(reference)
            .ok_or_else(|| BerthError::ImageNotFound(reference.to_string()))?;

        let key = format!("{repo}:{tag}");
        index.add_reference(key.clone(), &record.id);
        tracing::debug!(image = %key, id = %record.id.short(), "Tagged image");

        Ok(view(record, Some(&key)))
    }

    fn remove(&self, reference: &str) -> Option<ImageRecord> {
        let mut index = self.index.write();
        let (record, matched) = index.lookup(reference)?;

        if let Some(key) = matched
            && index.references_of(&record.id).len() > 1
        {
            index.references.remove(&key);
            index.unlink(&record.id, &key);
            return Some(view(record, Some(&key)));
        }

        index.references.retain(|_, target| *target != record.id);
        index.images.remove(record.id.as_str())
    }

    fn list(&self) -> Vec<ImageRecord> {
        let mut records: Vec<_> = self.index.read().images.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }
}
