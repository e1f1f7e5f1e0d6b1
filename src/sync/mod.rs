// Sync module - HOW NODES TALK
// Wire protocol, peer table, waiters and the gossip node itself

mod config;
mod gossip;
mod peer;
mod protocol;
mod waiters;

pub use config::{NodeConfig, DEFAULT_EXPIRY_INTERVAL_MS, DEFAULT_TIMEOUT_MS};
pub use gossip::{Node, NodeError, NodeEvent};
pub use peer::{PeerStats, PeerTable};
pub use protocol::{
    new_message_uuid, now_millis, Delete, Message, MessageType, Post, ProtocolError,
    StoredMessage,
};
pub use waiters::WaitRegistry;
