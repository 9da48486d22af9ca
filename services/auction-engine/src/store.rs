//! Content-addressed metadata store interface
//!
//! The store is an external collaborator: `get(id) -> blob`,
//! `put(blob, tags) -> id`, and tag-filtered listing with AND semantics.
//! `MemoryContentStore` is the in-process implementation used for local
//! runs and tests, with injectable transient failures.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::retry::Retryable;

pub type ContentId = String;
pub type Tags = BTreeMap<String, String>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("content not found: {0}")]
    NotFound(ContentId),

    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("permanent store failure: {0}")]
    Permanent(String),
}

impl Retryable for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Equality filters combined with AND
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    equals: Tags,
}

impl TagFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.equals.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, tags: &Tags) -> bool {
        self.equals
            .iter()
            .all(|(key, value)| tags.get(key) == Some(value))
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&String, &String)> {
        self.equals.iter()
    }
}

/// A listed blob with the tags it was stored under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub id: ContentId,
    pub tags: Tags,
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Vec<u8>, StoreError>;
    async fn put(&self, blob: Vec<u8>, tags: Tags) -> Result<ContentId, StoreError>;
    async fn list(&self, filter: &TagFilter) -> Result<Vec<StoredEntry>, StoreError>;
}

/// Content id derived from the blob: `bafk` + sha256 hex.
pub fn content_id_for(blob: &[u8]) -> ContentId {
    let digest = Sha256::digest(blob);
    format!("bafk{}", hex::encode(digest))
}

#[derive(Debug, Clone)]
struct Entry {
    blob: Vec<u8>,
    tags: Tags,
}

/// In-memory content-addressed store
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    entries: RwLock<BTreeMap<ContentId, Entry>>,
    failing_gets: AtomicU32,
    unavailable: AtomicBool,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` reads fail transiently.
    pub fn fail_next_gets(&self, n: u32) {
        self.failing_gets.store(n, Ordering::SeqCst);
    }

    /// Make every call fail transiently until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Store a blob under an explicit id (fixtures with known ids).
    pub async fn insert_with_id(&self, id: impl Into<ContentId>, blob: Vec<u8>, tags: Tags) {
        self.entries
            .write()
            .await
            .insert(id.into(), Entry { blob, tags });
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Transient("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn get(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        self.check_available()?;
        let injected = self
            .failing_gets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            debug!(id, "Injected transient get failure");
            return Err(StoreError::Transient("injected failure".to_string()));
        }

        self.entries
            .read()
            .await
            .get(id)
            .map(|entry| entry.blob.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn put(&self, blob: Vec<u8>, tags: Tags) -> Result<ContentId, StoreError> {
        self.check_available()?;
        let id = content_id_for(&blob);
        debug!(id = %id, tag_count = tags.len(), "Storing blob");
        self.entries
            .write()
            .await
            .insert(id.clone(), Entry { blob, tags });
        Ok(id)
    }

    async fn list(&self, filter: &TagFilter) -> Result<Vec<StoredEntry>, StoreError> {
        self.check_available()?;
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|(_, entry)| filter.matches(&entry.tags))
            .map(|(id, entry)| StoredEntry {
                id: id.clone(),
                tags: entry.tags.clone(),
            })
            .collect())
    }
}
