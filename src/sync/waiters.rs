// Wait Registry - Futures that resolve on peer or message arrival
//
// Two independent registries:
// - by peer display name: resolves once a ready peer with that name exists
// - by message uuid: resolves once that uuid is in the store
//
// Each waiter fires at most once and is removed when it fires. The node checks
// the retroactive case itself before registering.

use std::collections::HashMap;
use tokio::sync::oneshot;

/// Waiters keyed by an arbitrary string
#[derive(Debug, Default)]
struct KeyedWaiters {
    waiters: HashMap<String, Vec<oneshot::Sender<()>>>,
}

impl KeyedWaiters {
    fn register(&mut self, key: &str) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.waiters.entry(key.to_string()).or_default().push(tx);
        rx
    }

    fn fire(&mut self, key: &str) -> usize {
        let Some(waiters) = self.waiters.remove(key) else {
            return 0;
        };
        waiters
            .into_iter()
            .filter(|tx| !tx.is_closed())
            .map(|tx| tx.send(()))
            .filter(Result::is_ok)
            .count()
    }

    fn pending(&self) -> usize {
        self.waiters.values().map(Vec::len).sum()
    }

    fn prune(&mut self) {
        self.waiters.retain(|_, waiters| {
            waiters.retain(|tx| !tx.is_closed());
            !waiters.is_empty()
        });
    }
}

/// Registry of pending waits, owned by a node
#[derive(Debug, Default)]
pub struct WaitRegistry {
    peers: KeyedWaiters,
    messages: KeyedWaiters,
}

impl WaitRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in a peer named `name` becoming ready
    pub fn wait_for_peer(&mut self, name: &str) -> oneshot::Receiver<()> {
        self.peers.prune();
        self.peers.register(name)
    }

    /// Register interest in a message uuid being stored
    pub fn wait_for_message(&mut self, uuid: &str) -> oneshot::Receiver<()> {
        self.messages.prune();
        self.messages.register(uuid)
    }

    /// Resolve every waiter for a peer name; returns how many were woken
    pub fn peer_ready(&mut self, name: &str) -> usize {
        self.peers.fire(name)
    }

    /// Resolve every waiter for a message uuid; returns how many were woken
    pub fn message_stored(&mut self, uuid: &str) -> usize {
        self.messages.fire(uuid)
    }

    /// Number of outstanding peer waiters
    pub fn pending_peer_waits(&self) -> usize {
        self.peers.pending()
    }

    /// Number of outstanding message waiters
    pub fn pending_message_waits(&self) -> usize {
        self.messages.pending()
    }

    /// Drop every waiter; their futures resolve with an error
    pub fn clear(&mut self) {
        self.peers.waiters.clear();
        self.messages.waiters.clear();
    }
}
