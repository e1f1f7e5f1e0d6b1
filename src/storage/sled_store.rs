// SledStore - Board records in an embedded sled database
//
// One tree holds every record, keyed by uuid, valued by the same JSON object
// that travels on the wire. A second tree indexes tombstones by target and
// author so the tombstone check is a point lookup. Each mutation is flushed
// before it returns.

use crate::storage::store::{MessageStore, StorageStats, StoreError};
use crate::sync::StoredMessage;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Name of the tree holding posts and tombstones
const MESSAGES_TREE: &str = "messages";

/// Name of the tree indexing tombstones by `post_uuid` and author
const TOMBSTONES_TREE: &str = "tombstones";

fn tombstone_key(post_uuid: &str, author: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(post_uuid.len() + author.len() + 1);
    key.extend_from_slice(post_uuid.as_bytes());
    key.push(0);
    key.extend_from_slice(author.as_bytes());
    key
}

/// Persistent store for board records
///
/// Uses sled for crash-safe, embedded storage.
pub struct SledStore {
    db: sled::Db,
    messages: sled::Tree,
    tombstones: sled::Tree,
}

impl SledStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        Self::with_db(db)
    }

    /// Open a throwaway store that is removed when dropped
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        Self::with_db(db)
    }

    fn with_db(db: sled::Db) -> Result<Self, StoreError> {
        let messages = db
            .open_tree(MESSAGES_TREE)
            .map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        let tombstones = db
            .open_tree(TOMBSTONES_TREE)
            .map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        let store = Self {
            db,
            messages,
            tombstones,
        };
        store.rebuild_index()?;
        Ok(store)
    }

    /// Recreate the tombstone index from the records tree
    fn rebuild_index(&self) -> Result<(), StoreError> {
        self.tombstones.clear()?;
        for record in self.records()? {
            if let StoredMessage::Delete(delete) = record {
                self.tombstones
                    .insert(tombstone_key(&delete.post_uuid, &delete.author), delete.uuid.as_bytes())?;
            }
        }
        Ok(())
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::FlushFailed(e.to_string()))?;
        Ok(())
    }

    fn put(&self, record: &StoredMessage) -> Result<(), StoreError> {
        let bytes = record.to_json_bytes()?;
        self.messages.insert(record.uuid().as_bytes(), bytes)?;
        if let StoredMessage::Delete(delete) = record {
            self.tombstones
                .insert(tombstone_key(&delete.post_uuid, &delete.author), delete.uuid.as_bytes())?;
        }
        Ok(())
    }

    /// Decode every readable record; undecodable entries are skipped
    fn records(&self) -> Result<Vec<StoredMessage>, StoreError> {
        let mut records = Vec::new();
        for entry in self.messages.iter() {
            let (key, value) = entry?;
            match StoredMessage::from_json_bytes(&value) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "Skipping unreadable record {}: {}",
                    String::from_utf8_lossy(&key),
                    e
                ),
            }
        }
        Ok(records)
    }
}

impl MessageStore for SledStore {
    fn save_if_not_deleted(&mut self, message: StoredMessage) -> Result<bool, StoreError> {
        if self.has_deleted(&message)? {
            return Ok(false);
        }
        self.put(&message)?;
        self.flush()?;
        Ok(true)
    }

    fn delete(&mut self, uuid: &str) -> Result<Option<StoredMessage>, StoreError> {
        let removed = match self.messages.remove(uuid.as_bytes())? {
            Some(bytes) => StoredMessage::from_json_bytes(&bytes).ok(),
            None => None,
        };
        if let Some(StoredMessage::Delete(delete)) = &removed {
            self.tombstones
                .remove(tombstone_key(&delete.post_uuid, &delete.author))?;
        }
        self.flush()?;
        Ok(removed)
    }

    fn delete_posts_older_than(&mut self, now: u64, node_timeout: u64) -> Result<usize, StoreError> {
        let mut evicted = 0;
        for record in self.records()? {
            if let StoredMessage::Post(post) = &record {
                if post.is_expired(now, node_timeout) {
                    self.messages.remove(post.uuid.as_bytes())?;
                    evicted += 1;
                }
            }
        }
        if evicted > 0 {
            self.flush()?;
        }
        Ok(evicted)
    }

    fn refresh_author(&mut self, author: &str, new_time: u64) -> Result<usize, StoreError> {
        let mut refreshed = 0;
        for record in self.records()? {
            if let StoredMessage::Post(mut post) = record {
                if post.author == author && post.refresh_time < new_time {
                    post.refresh_time = new_time;
                    self.put(&StoredMessage::Post(post))?;
                    refreshed += 1;
                }
            }
        }
        if refreshed > 0 {
            self.flush()?;
        }
        Ok(refreshed)
    }

    fn list(&self) -> Result<HashMap<String, StoredMessage>, StoreError> {
        Ok(self
            .records()?
            .into_iter()
            .map(|record| (record.uuid().to_string(), record))
            .collect())
    }

    fn get(&self, uuid: &str) -> Result<Option<StoredMessage>, StoreError> {
        match self.messages.get(uuid.as_bytes())? {
            Some(bytes) => match StoredMessage::from_json_bytes(&bytes) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    warn!("Ignoring unreadable record {}: {}", uuid, e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    fn has_deleted(&self, message: &StoredMessage) -> Result<bool, StoreError> {
        if let StoredMessage::Delete(_) = message {
            return Ok(false);
        }
        Ok(self
            .tombstones
            .contains_key(tombstone_key(message.uuid(), message.author()))?)
    }

    fn stats(&self) -> Result<StorageStats, StoreError> {
        let mut stats = StorageStats {
            disk_size_bytes: self.db.size_on_disk().unwrap_or(0),
            ..StorageStats::default()
        };
        for record in self.records()? {
            match record {
                StoredMessage::Post(_) => stats.post_count += 1,
                StoredMessage::Delete(_) => stats.delete_count += 1,
            }
        }
        Ok(stats)
    }
}
