// Node Configuration
//
// Everything a node needs to know before it opens its listener.

use crate::transport::{DEFAULT_MAX_FRAME_LENGTH, DEFAULT_OUTBOUND_QUEUE, DEFAULT_PORT};
use serde::{Deserialize, Serialize};

/// Default node TTL for posts: a little under 8.5 hours
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000_000;

/// Default period of the expiry sweep
pub const DEFAULT_EXPIRY_INTERVAL_MS: u64 = 1_000;

/// Configuration for a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Display name sent in handshakes and used as author
    pub name: String,
    /// Address to bind to
    pub bind_address: String,
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Peers dialed at startup, as `host[:port]`
    pub initial_peers: Vec<String>,
    /// Node-local post TTL in milliseconds
    pub timeout_ms: u64,
    /// Period of the expiry sweep in milliseconds
    pub expiry_interval_ms: u64,
    /// Longest accepted line on the wire
    pub max_frame_length: usize,
    /// Lines queued per peer before it is dropped as stalled
    pub outbound_queue: usize,
    /// Capacity of the node event channel
    pub event_capacity: usize,
    /// Enable TCP_NODELAY
    pub nodelay: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "anonymous".to_string(),
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            initial_peers: Vec::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            expiry_interval_ms: DEFAULT_EXPIRY_INTERVAL_MS,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            event_capacity: 1024,
            nodelay: true,
        }
    }
}

impl NodeConfig {
    /// Create a config with the given display name
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_bind_address(mut self, addr: &str) -> Self {
        self.bind_address = addr.to_string();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_initial_peer(mut self, peer: &str) -> Self {
        self.initial_peers.push(peer.to_string());
        self
    }

    pub fn with_initial_peers(mut self, peers: Vec<String>) -> Self {
        self.initial_peers = peers;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_expiry_interval_ms(mut self, interval_ms: u64) -> Self {
        self.expiry_interval_ms = interval_ms;
        self
    }

    pub fn with_max_frame_length(mut self, len: usize) -> Self {
        self.max_frame_length = len;
        self
    }

    pub fn with_outbound_queue(mut self, capacity: usize) -> Self {
        self.outbound_queue = capacity;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name cannot be empty".to_string());
        }
        if self.expiry_interval_ms == 0 {
            return Err("expiry_interval_ms cannot be 0".to_string());
        }
        if self.max_frame_length == 0 {
            return Err("max_frame_length cannot be 0".to_string());
        }
        if self.outbound_queue == 0 {
            return Err("outbound_queue cannot be 0".to_string());
        }
        if self.event_capacity == 0 {
            return Err("event_capacity cannot be 0".to_string());
        }
        Ok(())
    }
}
