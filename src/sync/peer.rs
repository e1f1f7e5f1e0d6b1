// Peer Table - The node's live connections
//
// Keyed by connection id rather than display name: names are self-asserted
// and may collide, and a reconnecting node gets a fresh id.

use crate::transport::{ConnectionId, PeerConnection, PeerInfo, PeerStatus};
use std::collections::HashMap;

/// Statistics about the peer table
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerStats {
    pub total_peers: usize,
    pub ready_peers: usize,
    pub handshaking_peers: usize,
}

/// Table of live connections
#[derive(Default)]
pub struct PeerTable {
    peers: HashMap<ConnectionId, PeerConnection>,
}

impl PeerTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if table is empty
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Get number of peers
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Add a connection
    pub fn insert(&mut self, peer: PeerConnection) {
        self.peers.insert(peer.id(), peer);
    }

    /// Remove a connection
    pub fn remove(&mut self, id: &ConnectionId) -> Option<PeerConnection> {
        self.peers.remove(id)
    }

    /// Get a connection
    pub fn get(&self, id: &ConnectionId) -> Option<&PeerConnection> {
        self.peers.get(id)
    }

    /// Get a mutable reference to a connection
    pub fn get_mut(&mut self, id: &ConnectionId) -> Option<&mut PeerConnection> {
        self.peers.get_mut(id)
    }

    /// Connections that have completed the handshake
    pub fn ready_mut(&mut self) -> impl Iterator<Item = &mut PeerConnection> {
        self.peers.values_mut().filter(|peer| peer.is_ready())
    }

    /// Whether a ready peer with this display name exists
    pub fn has_ready_peer_named(&self, name: &str) -> bool {
        self.peers
            .values()
            .any(|peer| peer.is_ready() && peer.name() == Some(name))
    }

    /// Connection id of some peer with this display name.
    ///
    /// If several peers share the name, any one of them is returned.
    pub fn connection_id_for(&self, name: &str) -> Option<ConnectionId> {
        self.peers
            .values()
            .find(|peer| peer.name() == Some(name))
            .map(PeerConnection::id)
    }

    /// Socket-free snapshots of every connection
    pub fn infos(&self) -> Vec<PeerInfo> {
        self.peers.values().map(PeerConnection::info).collect()
    }

    /// Remove and return every connection
    pub fn drain(&mut self) -> Vec<PeerConnection> {
        self.peers.drain().map(|(_, peer)| peer).collect()
    }

    /// Get statistics
    pub fn stats(&self) -> PeerStats {
        let mut stats = PeerStats {
            total_peers: self.peers.len(),
            ..PeerStats::default()
        };

        for peer in self.peers.values() {
            match peer.status() {
                PeerStatus::Ready => stats.ready_peers += 1,
                PeerStatus::Handshaking => stats.handshaking_peers += 1,
                PeerStatus::Closed => {}
            }
        }

        stats
    }
}
