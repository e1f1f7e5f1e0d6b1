// MessageStore - Persistence contract for posts and tombstones
//
// Every node keeps its own copy of the board:
// - Posts, expired by the stricter of the node TTL and the post's own TTL
// - Deletes (tombstones), kept forever so late gossip cannot resurrect a post
//
// MemoryStore is the reference implementation; the sled and JSON backends
// follow the same contract on disk.

use crate::sync::{ProtocolError, StoredMessage};
use std::collections::HashMap;
use thiserror::Error;

/// Errors from storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    OpenFailed(String),

    #[error("Database operation failed: {0}")]
    DatabaseError(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Flush failed: {0}")]
    FlushFailed(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::DatabaseError(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::IoError(err.to_string())
    }
}

impl From<ProtocolError> for StoreError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::EncodeFailed(e) => StoreError::SerializationFailed(e),
            ProtocolError::DecodeFailed(e) => StoreError::DeserializationFailed(e),
        }
    }
}

/// Statistics about the storage
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of stored posts
    pub post_count: usize,
    /// Number of stored tombstones
    pub delete_count: usize,
    /// Approximate disk size in bytes (0 for in-memory stores)
    pub disk_size_bytes: u64,
}

/// Storage contract used by the node.
///
/// Mutations are observed by subsequent reads on the same store
/// (read-your-writes). Implementations do not need to be internally
/// synchronized; the node serializes access.
pub trait MessageStore: Send {
    /// Persist a record unless a tombstone by the same author covers it.
    ///
    /// Overwrites any record with the same uuid. Returns whether the record
    /// was stored.
    fn save_if_not_deleted(&mut self, message: StoredMessage) -> Result<bool, StoreError>;

    /// Remove the record with this uuid. Does not create a tombstone.
    fn delete(&mut self, uuid: &str) -> Result<Option<StoredMessage>, StoreError>;

    /// Evict every post whose node TTL or own TTL has elapsed at `now`.
    ///
    /// Tombstones are never evicted. Returns the number of posts removed.
    fn delete_posts_older_than(&mut self, now: u64, node_timeout: u64) -> Result<usize, StoreError>;

    /// Advance `refresh_time` of every post by `author` that is older than
    /// `new_time`. Never moves a refresh time backwards.
    fn refresh_author(&mut self, author: &str, new_time: u64) -> Result<usize, StoreError>;

    /// Snapshot of every stored record keyed by uuid
    fn list(&self) -> Result<HashMap<String, StoredMessage>, StoreError>;

    /// Get a record by uuid
    fn get(&self, uuid: &str) -> Result<Option<StoredMessage>, StoreError>;

    /// Whether a tombstone by the same author exists for this record
    fn has_deleted(&self, message: &StoredMessage) -> Result<bool, StoreError> {
        Ok(self
            .list()?
            .values()
            .any(|record| record.is_tombstone_for(message)))
    }

    /// Whether a record with this uuid is stored
    fn contains(&self, uuid: &str) -> Result<bool, StoreError> {
        Ok(self.get(uuid)?.is_some())
    }

    /// Get storage statistics
    fn stats(&self) -> Result<StorageStats, StoreError> {
        let mut stats = StorageStats::default();
        for record in self.list()?.values() {
            match record {
                StoredMessage::Post(_) => stats.post_count += 1,
                StoredMessage::Delete(_) => stats.delete_count += 1,
            }
        }
        Ok(stats)
    }
}

// ============================================================================
// SHARED MUTATION HELPERS
// ============================================================================

/// Apply an expiry sweep to an in-memory map, returning the evicted uuids
pub(crate) fn sweep_expired(
    records: &mut HashMap<String, StoredMessage>,
    now: u64,
    node_timeout: u64,
) -> Vec<String> {
    let expired: Vec<String> = records
        .iter()
        .filter_map(|(uuid, record)| match record {
            StoredMessage::Post(post) if post.is_expired(now, node_timeout) => Some(uuid.clone()),
            _ => None,
        })
        .collect();

    for uuid in &expired {
        records.remove(uuid);
    }
    expired
}

/// Refresh every post by `author` in an in-memory map, returning the refreshed uuids
pub(crate) fn refresh_in_place(
    records: &mut HashMap<String, StoredMessage>,
    author: &str,
    new_time: u64,
) -> Vec<String> {
    let mut refreshed = Vec::new();
    for (uuid, record) in records.iter_mut() {
        if let StoredMessage::Post(post) = record {
            if post.author == author && post.refresh_time < new_time {
                post.refresh_time = new_time;
                refreshed.push(uuid.clone());
            }
        }
    }
    refreshed
}

// ============================================================================
// MEMORY STORE
// ============================================================================

/// Volatile store backed by a hash map
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    records: HashMap<String, StoredMessage>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with records
    pub fn with_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = StoredMessage>,
    {
        Self {
            records: records
                .into_iter()
                .map(|record| (record.uuid().to_string(), record))
                .collect(),
        }
    }
}

impl MessageStore for MemoryStore {
    fn save_if_not_deleted(&mut self, message: StoredMessage) -> Result<bool, StoreError> {
        if self.has_deleted(&message)? {
            return Ok(false);
        }
        self.records.insert(message.uuid().to_string(), message);
        Ok(true)
    }

    fn delete(&mut self, uuid: &str) -> Result<Option<StoredMessage>, StoreError> {
        Ok(self.records.remove(uuid))
    }

    fn delete_posts_older_than(&mut self, now: u64, node_timeout: u64) -> Result<usize, StoreError> {
        Ok(sweep_expired(&mut self.records, now, node_timeout).len())
    }

    fn refresh_author(&mut self, author: &str, new_time: u64) -> Result<usize, StoreError> {
        Ok(refresh_in_place(&mut self.records, author, new_time).len())
    }

    fn list(&self) -> Result<HashMap<String, StoredMessage>, StoreError> {
        Ok(self.records.clone())
    }

    fn get(&self, uuid: &str) -> Result<Option<StoredMessage>, StoreError> {
        Ok(self.records.get(uuid).cloned())
    }

    fn has_deleted(&self, message: &StoredMessage) -> Result<bool, StoreError> {
        Ok(self
            .records
            .values()
            .any(|record| record.is_tombstone_for(message)))
    }
}
