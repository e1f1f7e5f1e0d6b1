//! A peer-to-peer message board.
//!
//! Nodes connect over TCP, flood posts and tombstones to each other, reconcile
//! on demand with an anti-entropy sync, and forget posts once their TTL runs
//! out.

pub mod console;
pub mod storage;
pub mod sync;
pub mod transport;

pub use storage::{JsonFileStore, MemoryStore, MessageStore, SledStore, StoreError};
pub use sync::{Message, Node, NodeConfig, NodeError, NodeEvent};
pub use transport::ConnectionId;
