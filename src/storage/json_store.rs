// JsonFileStore - Board records in a single JSON file
//
// The file holds one object mapping uuid to record. It is rewritten in full
// after every mutation.

use crate::storage::store::{refresh_in_place, sweep_expired, MessageStore, StoreError};
use crate::sync::StoredMessage;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File-backed store
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: HashMap<String, StoredMessage>,
}

impl JsonFileStore {
    /// Open the store at `path`.
    ///
    /// A missing, empty or unparsable file starts an empty store.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let records = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => HashMap::new(),
            Ok(text) => match serde_json::from_str(&text) {
                Ok(records) => records,
                Err(e) => {
                    warn!("Could not parse {}, starting empty: {}", path.display(), e);
                    HashMap::new()
                }
            },
            Err(e) => {
                debug!("Could not read {}, starting empty: {}", path.display(), e);
                HashMap::new()
            }
        };
        Self { path, records }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self) -> Result<(), StoreError> {
        let text = serde_json::to_string(&self.records)
            .map_err(|e| StoreError::SerializationFailed(e.to_string()))?;
        fs::write(&self.path, text)?;
        Ok(())
    }
}

impl MessageStore for JsonFileStore {
    fn save_if_not_deleted(&mut self, message: StoredMessage) -> Result<bool, StoreError> {
        if self.has_deleted(&message)? {
            return Ok(false);
        }
        self.records.insert(message.uuid().to_string(), message);
        self.write()?;
        Ok(true)
    }

    fn delete(&mut self, uuid: &str) -> Result<Option<StoredMessage>, StoreError> {
        let removed = self.records.remove(uuid);
        self.write()?;
        Ok(removed)
    }

    fn delete_posts_older_than(&mut self, now: u64, node_timeout: u64) -> Result<usize, StoreError> {
        let evicted = sweep_expired(&mut self.records, now, node_timeout).len();
        if evicted > 0 {
            self.write()?;
        }
        Ok(evicted)
    }

    fn refresh_author(&mut self, author: &str, new_time: u64) -> Result<usize, StoreError> {
        let refreshed = refresh_in_place(&mut self.records, author, new_time).len();
        if refreshed > 0 {
            self.write()?;
        }
        Ok(refreshed)
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
