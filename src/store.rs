//! Storage seams: object store and keyed record stores
//!
//! The orchestrator persists three kinds of state: archive bytes (object
//! store), archive catalog rows, and run record memos. Each sits behind a
//! trait so the core never depends on a concrete backend; the in-memory
//! implementations here back the tests and local single-process use, and
//! [`crate::s3::S3ObjectStore`] backs archives in production.
//!
//! Both record stores expose a compare-and-swap insert: concurrent writers
//! of the same key never create two rows, and the insert's return value
//! tells the caller who won.

use crate::cache::{CacheKey, RunRecord};
use crate::content::ArchiveRecord;
use crate::error::{Result, VerifyError};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Durable byte storage: `put(key, bytes) -> uri`, `get(uri) -> bytes`
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes under `key`, returning the object's URI.
    ///
    /// Writing the same key twice is allowed and idempotent; callers derive
    /// keys from content hashes.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String>;

    /// Fetch the bytes behind a URI previously returned by `put`
    async fn get(&self, uri: &str) -> Result<Vec<u8>>;

    /// Whether an object exists under `key`
    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Archive catalog: at most one row per content hash
#[async_trait]
pub trait ArchiveCatalog: Send + Sync {
    /// Find the record for a content hash
    async fn find(&self, content_hash: &str) -> Result<Option<ArchiveRecord>>;

    /// Insert keyed on `content_hash`, returning the stored winner.
    ///
    /// A concurrent duplicate insert is success: the existing record comes
    /// back unchanged.
    async fn insert_if_absent(&self, record: ArchiveRecord) -> Result<ArchiveRecord>;
}

/// Run record memo store, keyed by cache key
#[async_trait]
pub trait RunRecordStore: Send + Sync {
    /// Find the record for a cache key
    async fn find(&self, key: &CacheKey) -> Result<Option<RunRecord>>;

    /// Compare-and-swap insert: `None` means the caller's record was stored
    /// (the caller won the key); `Some` returns the pre-existing record.
    async fn try_insert(&self, record: RunRecord) -> Result<Option<RunRecord>>;

    /// Keyed overwrite of an existing record (last-writer-safe)
    async fn update(&self, record: RunRecord) -> Result<()>;
}

/// In-memory object store (`mem://` URIs)
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub async fn object_count(&self) -> usize {
        self.objects.lock().await.len()
    }
}

const MEM_URI_PREFIX: &str = "mem://";

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String> {
        self.objects
            .lock()
            .await
            .insert(key.to_string(), bytes.to_vec());
        Ok(format!("{MEM_URI_PREFIX}{key}"))
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>> {
        let key = uri
            .strip_prefix(MEM_URI_PREFIX)
            .ok_or_else(|| VerifyError::storage(format!("not a mem:// URI: {uri}")))?;
        self.objects
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| VerifyError::storage(format!("no object at {uri}")))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.lock().await.contains_key(key))
    }
}

/// In-memory archive catalog
#[derive(Default)]
pub struct MemoryArchiveCatalog {
    records: Mutex<HashMap<String, ArchiveRecord>>,
}

impl MemoryArchiveCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArchiveCatalog for MemoryArchiveCatalog {
    async fn find(&self, content_hash: &str) -> Result<Option<ArchiveRecord>> {
        Ok(self.records.lock().await.get(content_hash).cloned())
    }

    async fn insert_if_absent(&self, record: ArchiveRecord) -> Result<ArchiveRecord> {
        let mut records = self.records.lock().await;
        Ok(records
            .entry(record.content_hash.clone())
            .or_insert(record)
            .clone())
    }
}

/// In-memory run record store
#[derive(Default)]
pub struct MemoryRunRecordStore {
    records: Mutex<HashMap<CacheKey, RunRecord>>,
}

impl MemoryRunRecordStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunRecordStore for MemoryRunRecordStore {
    async fn find(&self, key: &CacheKey) -> Result<Option<RunRecord>> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn try_insert(&self, record: RunRecord) -> Result<Option<RunRecord>> {
        let mut records = self.records.lock().await;
        match records.get(&record.cache_key) {
            Some(existing) => Ok(Some(existing.clone())),
            None => {
                records.insert(record.cache_key.clone(), record);
                Ok(None)
            }
        }
    }

    async fn update(&self, record: RunRecord) -> Result<()> {
        self.records
            .lock()
            .await
            .insert(record.cache_key.clone(), record);
        Ok(())
    }
}
