//! Content-addressed archive storage
//!
//! Model archives are deduplicated by content hash: submitting the same
//! bytes twice returns the same [`ArchiveRecord`] and writes nothing. The
//! object write always precedes the catalog insert, so a catalog row never
//! references a missing object; because the storage key is derived from the
//! hash, concurrent duplicate submissions land on the same object and the
//! catalog insert is a compare-and-swap where losing the race is success.

use crate::error::Result;
use crate::store::{ArchiveCatalog, ObjectStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

/// A deduplicated, persisted model archive.
///
/// Identity is `content_hash`; at most one record exists per hash.
/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    /// sha256 hex digest over the archive bytes
    pub content_hash: String,

    /// Object store URI of the persisted bytes
    pub storage_uri: String,

    /// Filename as uploaded
    pub filename: String,

    /// Archive size in bytes
    pub size: u64,

    /// First-upload timestamp
    pub created_at: DateTime<Utc>,
}

/// sha256 hex digest of a byte slice
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Deduplicating archive store
pub struct ContentStore {
    objects: Arc<dyn ObjectStore>,
    catalog: Arc<dyn ArchiveCatalog>,
}

impl ContentStore {
    /// Create a content store over the given object store and catalog
    pub fn new(objects: Arc<dyn ObjectStore>, catalog: Arc<dyn ArchiveCatalog>) -> Self {
        Self { objects, catalog }
    }

    /// Submit archive bytes, returning the canonical record for their hash.
    ///
    /// Idempotent: identical bytes always return the same record, and no
    /// duplicate storage write or catalog row is created.
    pub async fn submit(&self, bytes: &[u8], filename: &str) -> Result<ArchiveRecord> {
        let content_hash = hash_bytes(bytes);

        if let Some(existing) = self.catalog.find(&content_hash).await? {
            debug!(
                content_hash = %content_hash,
                filename = %filename,
                "Archive already known, reusing record"
            );
            return Ok(existing);
        }

        let key = Self::storage_key(&content_hash);
        let storage_uri = self.objects.put(&key, bytes).await?;

        let record = ArchiveRecord {
            content_hash: content_hash.clone(),
            storage_uri,
            filename: filename.to_string(),
            size: bytes.len() as u64,
            created_at: Utc::now(),
        };

        // Duplicate insert means a concurrent submitter won the race; their
        // record points at the same object, so adopting it is correct.
        let winner = self.catalog.insert_if_absent(record).await?;

        info!(
            content_hash = %content_hash,
            size = winner.size,
            "Archive stored"
        );

        Ok(winner)
    }

    fn storage_key(content_hash: &str) -> String {
        format!("archives/{content_hash}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryArchiveCatalog, MemoryObjectStore};

    fn content_store() -> (ContentStore, Arc<MemoryObjectStore>) {
        let objects = Arc::new(MemoryObjectStore::new());
        let catalog = Arc::new(MemoryArchiveCatalog::new());
        (ContentStore::new(objects.clone(), catalog), objects)
    }

    #[test]
    fn test_hash_bytes_stable() {
        assert_eq!(hash_bytes(b"model"), hash_bytes(b"model"));
        assert_ne!(hash_bytes(b"model"), hash_bytes(b"model2"));
    }

    #[tokio::test]
    async fn test_submit_is_idempotent() {
        let (store, objects) = content_store();

        let first = store.submit(b"archive bytes", "model.omex").await.unwrap();
        let second = store.submit(b"archive bytes", "renamed.omex").await.unwrap();

        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(first.storage_uri, second.storage_uri);
        // The second upload's filename is ignored: the record is immutable
        assert_eq!(second.filename, "model.omex");
        assert_eq!(objects.object_count().await, 1);
    }

    #[tokio::test]
    async fn test_distinct_content_distinct_records() {
        let (store, objects) = content_store();

        let a = store.submit(b"model a", "a.omex").await.unwrap();
        let b = store.submit(b"model b", "b.omex").await.unwrap();

        assert_ne!(a.content_hash, b.content_hash);
        assert_ne!(a.storage_uri, b.storage_uri);
        assert_eq!(objects.object_count().await, 2);
    }

    #[tokio::test]
    async fn test_record_round_trips_bytes() {
        let (store, objects) = content_store();
        let record = store.submit(b"payload", "p.omex").await.unwrap();
        let bytes = objects.get(&record.storage_uri).await.unwrap();
        assert_eq!(bytes, b"payload");
        assert_eq!(record.size, 7);
    }
}
