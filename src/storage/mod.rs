// Storage module - PERSISTENCE
// Holds posts and tombstones: in memory, in sled, or in a JSON file

mod json_store;
mod sled_store;
mod store;

pub use json_store::JsonFileStore;
pub use sled_store::SledStore;
pub use store::{MemoryStore, MessageStore, StorageStats, StoreError};
