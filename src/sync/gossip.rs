// Gossip Engine - The heart of the board
//
// A Node owns the listener, the peer table, the store and the wait registry:
// - Push: posts and tombstones are flooded to every ready peer
// - Pull: anti-entropy sync answers a peer's inventory with what it lacks
// - Expiry: a timer evicts posts whose TTL has run out
//
// Messages from one connection are handled in arrival order by that
// connection's reader task. Different connections run concurrently; the
// store, peer table and waiters are each behind their own lock.

use crate::storage::{MessageStore, StorageStats, StoreError};
use crate::sync::config::NodeConfig;
use crate::sync::peer::{PeerStats, PeerTable};
use crate::sync::protocol::{now_millis, Delete, Message, MessageType, Post, StoredMessage};
use crate::sync::waiters::WaitRegistry;
use crate::transport::{
    self, ConnectionId, FrameReader, Inbound, PeerAddress, PeerConnection, PeerInfo, PeerSender,
    TransportError,
};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Node-level errors
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to bind listener: {0}")]
    BindFailed(String),

    #[error("Not connected: {0}")]
    NotConnected(ConnectionId),

    #[error("Not connected with any peer named {0}")]
    UnknownPeer(String),

    #[error("{0} messages are not broadcast")]
    NotBroadcastable(MessageType),

    #[error("Node is closed")]
    Closed,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl NodeError {
    /// Check if the caller's view of connectivity is stale or the link failed
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::NotConnected(_) | Self::UnknownPeer(_) => true,
            Self::Transport(e) => e.is_connection_error(),
            _ => false,
        }
    }

    /// Check if the operation can be retried by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(TransportError::ConnectionFailed(_) | TransportError::SendFailed(_))
        )
    }
}

/// Events produced by a node for the user-facing layer
#[derive(Clone, Debug)]
pub enum NodeEvent {
    /// A peer completed its handshake
    PeerReady { id: ConnectionId, name: String },
    /// A connection went away
    PeerClosed { id: ConnectionId, name: Option<String> },
    /// A post this node had never stored before arrived
    PostReceived(Post),
    /// A received tombstone removed a stored post
    PostDeleted { post_uuid: String, author: String },
    /// The expiry sweep evicted posts
    PostsExpired { count: usize },
}

/// What handling a received tombstone decided
enum DeleteOutcome {
    /// This tombstone was already stored
    Duplicate,
    /// The target is not here (yet); keep the tombstone
    Early,
    /// The tombstone's author does not own the target
    Rejected { owner: String },
    /// The target was removed
    Applied,
}

struct NodeInner {
    config: NodeConfig,
    local_addr: SocketAddr,
    peers: Mutex<PeerTable>,
    store: Mutex<Box<dyn MessageStore>>,
    waiters: Mutex<WaitRegistry>,
    events: broadcast::Sender<NodeEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// A running board node.
///
/// Cheap to clone; every clone drives the same node. Background tasks only
/// hold weak references, so the node stops once [`Node::close`] is called or
/// the last handle is dropped.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Open the listener, start the expiry timer and dial the initial peers.
    ///
    /// Initial dials run in the background; failing to reach one is logged
    /// and does not fail startup.
    pub async fn start(config: NodeConfig, store: Box<dyn MessageStore>) -> Result<Self, NodeError> {
        config.validate().map_err(NodeError::InvalidConfig)?;

        let bind_addr = format!("{}:{}", config.bind_address, config.port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| NodeError::BindFailed(format!("{}: {}", bind_addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| NodeError::BindFailed(e.to_string()))?;

        let (events, _) = broadcast::channel(config.event_capacity);
        let expiry_interval = Duration::from_millis(config.expiry_interval_ms);
        let initial_peers = config.initial_peers.clone();

        let node = Self {
            inner: Arc::new(NodeInner {
                config,
                local_addr,
                peers: Mutex::new(PeerTable::new()),
                store: Mutex::new(store),
                waiters: Mutex::new(WaitRegistry::new()),
                events,
                tasks: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        };

        info!("Listening on {} as {}", local_addr, node.name());

        let accept = tokio::spawn(Self::accept_loop(node.downgrade(), listener));
        let expiry = tokio::spawn(Self::expiry_loop(node.downgrade(), expiry_interval));
        node.inner.tasks.lock().await.extend([accept, expiry]);

        for peer in initial_peers {
            let dialer = node.clone();
            tokio::spawn(async move {
                if let Err(e) = dialer.connect(&peer).await {
                    warn!("Could not reach initial peer {}: {}", peer, e);
                }
            });
        }

        Ok(node)
    }

    fn downgrade(&self) -> Weak<NodeInner> {
        Arc::downgrade(&self.inner)
    }

    fn upgrade(weak: &Weak<NodeInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn ensure_open(&self) -> Result<(), NodeError> {
        if self.is_closed() {
            return Err(NodeError::Closed);
        }
        Ok(())
    }

    fn emit(&self, event: NodeEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    /// This node's display name
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// The address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// The configuration the node was started with
    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Whether [`Node::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Subscribe to node events
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of every live connection
    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.inner.peers.lock().await.infos()
    }

    /// Peer table statistics
    pub async fn peer_stats(&self) -> PeerStats {
        self.inner.peers.lock().await.stats()
    }

    /// Connection id of a peer with this display name
    pub async fn connection_id_for(&self, name: &str) -> Result<ConnectionId, NodeError> {
        self.inner
            .peers
            .lock()
            .await
            .connection_id_for(name)
            .ok_or_else(|| NodeError::UnknownPeer(name.to_string()))
    }

    /// Snapshot of every stored record
    pub async fn stored_messages(&self) -> Result<HashMap<String, StoredMessage>, NodeError> {
        Ok(self.inner.store.lock().await.list()?)
    }

    /// Get a stored record by uuid
    pub async fn get_message(&self, uuid: &str) -> Result<Option<StoredMessage>, NodeError> {
        Ok(self.inner.store.lock().await.get(uuid)?)
    }

    /// Store statistics
    pub async fn store_stats(&self) -> Result<StorageStats, NodeError> {
        Ok(self.inner.store.lock().await.stats()?)
    }

    // ========================================================================
    // CONNECTIONS
    // ========================================================================

    async fn accept_loop(node: Weak<NodeInner>, listener: TcpListener) {
        loop {
            let accepted = listener.accept().await;
            let Some(node) = Self::upgrade(&node) else {
                break;
            };
            match accepted {
                Ok((stream, remote)) => {
                    debug!("Accepted connection from {}", remote);
                    if let Err(e) = node.setup_connection(stream, remote).await {
                        warn!("Failed to set up connection from {}: {}", remote, e);
                    }
                }
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Dial `host[:port]` (port defaults to 8080) and send our handshake.
    ///
    /// Returns once the handshake is sent; the peer becomes ready when its own
    /// handshake arrives.
    pub async fn connect(&self, address: &str) -> Result<ConnectionId, NodeError> {
        self.ensure_open()?;
        let address: PeerAddress = address.parse()?;

        let stream = TcpStream::connect((address.host.as_str(), address.port))
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", address, e)))?;
        let remote = stream.peer_addr().map_err(TransportError::from)?;

        info!("Connected to {}", address);
        self.setup_connection(stream, remote).await
    }

    /// Wrap a fresh socket as a handshaking peer and send our handshake
    async fn setup_connection(
        &self,
        stream: TcpStream,
        remote: SocketAddr,
    ) -> Result<ConnectionId, NodeError> {
        self.ensure_open()?;
        stream.set_nodelay(self.inner.config.nodelay).ok();

        let (reader, writer) = transport::split(stream, self.inner.config.max_frame_length);
        let id = ConnectionId::generate();
        let peer =
            PeerConnection::with_queue_capacity(id, remote, writer, self.inner.config.outbound_queue);
        let sender = peer.sender();

        {
            // Insert before the reader starts so the first handshake finds its peer
            let mut peers = self.inner.peers.lock().await;
            peers.insert(peer);
            let handle = tokio::spawn(Self::read_loop(self.downgrade(), id, reader));
            if let Some(peer) = peers.get_mut(&id) {
                peer.set_reader_task(handle);
            }
        }

        let handshake = Message::Handshake {
            name: self.name().to_string(),
        };
        if let Err(e) = sender.send(&handshake).await {
            self.connection_lost(id).await;
            return Err(e.into());
        }

        Ok(id)
    }

    async fn read_loop(node: Weak<NodeInner>, id: ConnectionId, mut reader: FrameReader) {
        loop {
            let inbound = transport::next_inbound(&mut reader).await;
            let Some(node) = Self::upgrade(&node) else {
                return;
            };
            match inbound {
                Some(Inbound::Message(message)) => node.handle_message(id, message).await,
                Some(Inbound::Malformed(e)) => {
                    warn!("Dropping malformed message from {}: {}", id, e);
                }
                Some(Inbound::Oversized) => {
                    warn!("Peer {} sent an oversized message, closing", id);
                    node.connection_lost(id).await;
                    return;
                }
                None => {
                    node.connection_lost(id).await;
                    return;
                }
            }
        }
    }

    /// Forget a connection whose socket is gone
    async fn connection_lost(&self, id: ConnectionId) {
        let removed = self.inner.peers.lock().await.remove(&id);
        if let Some(peer) = removed {
            info!(
                "Closing connection with peer {}",
                peer.name().unwrap_or("<unknown>")
            );
            self.emit(NodeEvent::PeerClosed {
                id,
                name: peer.name().map(str::to_string),
            });
        }
    }

    /// Close the connection with a peer
    pub async fn disconnect(&self, id: ConnectionId) -> Result<(), NodeError> {
        let removed = self.inner.peers.lock().await.remove(&id);
        let mut peer = removed.ok_or(NodeError::NotConnected(id))?;

        peer.close();
        info!(
            "Disconnected from peer {}",
            peer.name().unwrap_or("<unknown>")
        );
        self.emit(NodeEvent::PeerClosed {
            id,
            name: peer.name().map(str::to_string),
        });
        Ok(())
    }

    /// Stop listening, drop every connection and cancel the expiry timer.
    ///
    /// Peers are not told; to them this looks like a crash.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        for task in self.inner.tasks.lock().await.drain(..) {
            task.abort();
        }

        let peers = self.inner.peers.lock().await.drain();
        for mut peer in peers {
            peer.close();
        }

        self.inner.waiters.lock().await.clear();
        info!("Node {} closed", self.name());
    }

    // ========================================================================
    // SENDING
    // ========================================================================

    async fn sender_for(&self, id: ConnectionId) -> Result<PeerSender, NodeError> {
        self.inner
            .peers
            .lock()
            .await
            .get(&id)
            .map(PeerConnection::sender)
            .ok_or(NodeError::NotConnected(id))
    }

    /// Send one message to one peer
    pub async fn send_to(&self, id: ConnectionId, message: &Message) -> Result<(), NodeError> {
        let sender = self.sender_for(id).await?;
        sender.send(message).await?;
        Ok(())
    }

    /// Ask a peer for every record this node is missing
    pub async fn sync_with(&self, id: ConnectionId) -> Result<(), NodeError> {
        let sender = self.sender_for(id).await?;
        let has_uuids: Vec<String> = self.inner.store.lock().await.list()?.into_keys().collect();

        debug!("Requesting sync from {} ({} records held)", id, has_uuids.len());
        sender.send(&Message::SyncRequest { has_uuids }).await?;
        Ok(())
    }

    /// Store a record and wake anyone waiting for it
    async fn persist(&self, record: StoredMessage) -> Result<bool, StoreError> {
        let uuid = record.uuid().to_string();
        let stored = self.inner.store.lock().await.save_if_not_deleted(record)?;
        if stored {
            self.inner.waiters.lock().await.message_stored(&uuid);
        } else {
            debug!("Received message {} which was already deleted", uuid);
        }
        Ok(stored)
    }

    /// Originate or relay a message to the whole mesh.
    ///
    /// Posts and tombstones are stored first, then sent to every ready peer.
    /// Posts skip peers that already saw them; tombstones are always sent and
    /// remove their target from the local store. Preserve requests are applied
    /// locally and sent to every ready peer. Other messages are unicast only.
    ///
    /// Returns the number of peers the message reached.
    pub async fn broadcast_message(&self, message: Message) -> Result<usize, NodeError> {
        self.ensure_open()?;

        match &message {
            Message::Post(post) => {
                self.persist(StoredMessage::Post(post.clone())).await?;
            }
            Message::Delete(delete) => {
                // Tombstone first, under the same guard, so a concurrent relay
                // of the target cannot slip in between
                {
                    let mut store = self.inner.store.lock().await;
                    store.save_if_not_deleted(StoredMessage::Delete(delete.clone()))?;
                    store.delete(&delete.post_uuid)?;
                }
                self.inner.waiters.lock().await.message_stored(&delete.uuid);
            }
            Message::MessagePreserve { author, sent_time } => {
                self.inner
                    .store
                    .lock()
                    .await
                    .refresh_author(author, *sent_time)?;
            }
            other => return Err(NodeError::NotBroadcastable(other.message_type())),
        }

        Ok(self.fan_out(&message).await)
    }

    /// Queue a message for every ready peer without waiting on any socket.
    ///
    /// A peer whose outbound queue is full has stopped reading and is
    /// disconnected; the others are unaffected.
    async fn fan_out(&self, message: &Message) -> usize {
        let targets: Vec<PeerSender> = {
            let mut peers = self.inner.peers.lock().await;
            peers
                .ready_mut()
                .filter_map(|peer| match message {
                    Message::Post(post) => peer.mark_seen(&post.uuid).then(|| peer.sender()),
                    Message::Delete(delete) => {
                        peer.mark_seen(&delete.uuid);
                        Some(peer.sender())
                    }
                    _ => Some(peer.sender()),
                })
                .collect()
        };

        let mut delivered = 0;
        let mut stalled = Vec::new();
        for target in &targets {
            match target.try_send(message) {
                Ok(()) => delivered += 1,
                Err(TransportError::QueueFull(_)) => stalled.push(target.id()),
                Err(e) => warn!("Failed to send {} to {}: {}", message.message_type(), target.id(), e),
            }
        }

        for id in stalled {
            warn!("Peer {} is not reading, closing", id);
            // Another task may have dropped it already
            let _ = self.disconnect(id).await;
        }
        delivered
    }

    /// Post `content` as this node
    pub async fn post(&self, content: &str, custom_timeout: u64) -> Result<Post, NodeError> {
        let post = Post::new(self.name(), content, custom_timeout);
        self.broadcast_message(Message::Post(post.clone())).await?;
        Ok(post)
    }

    /// Tombstone a post as this node
    pub async fn delete_post(&self, post_uuid: &str) -> Result<Delete, NodeError> {
        let delete = Delete::new(self.name(), post_uuid);
        self.broadcast_message(Message::Delete(delete.clone())).await?;
        Ok(delete)
    }

    /// Extend the lifetime of every post by this node, everywhere
    pub async fn preserve_my_posts(&self) -> Result<usize, NodeError> {
        self.broadcast_message(Message::MessagePreserve {
            author: self.name().to_string(),
            sent_time: now_millis(),
        })
        .await
    }

    // ========================================================================
    // RECEIVING
    // ========================================================================

    /// Handle a message received on connection `from`.
    ///
    /// Never fails: protocol violations and store faults are logged and the
    /// message dropped, leaving the connection open.
    pub async fn handle_message(&self, from: ConnectionId, message: Message) {
        match message {
            Message::Handshake { name } => self.handle_handshake(from, &name).await,
            Message::Post(post) => self.handle_post(from, post).await,
            Message::Delete(delete) => self.handle_delete(from, delete).await,
            Message::SyncRequest { has_uuids } => self.handle_sync_request(from, has_uuids).await,
            Message::SyncResponse { messages } => self.handle_sync_response(from, messages).await,
            Message::MessagePreserve { author, sent_time } => {
                let refreshed = self.inner.store.lock().await.refresh_author(&author, sent_time);
                match refreshed {
                    Ok(count) => debug!("Preserved {} posts by {}", count, author),
                    Err(e) => warn!("Failed to preserve posts by {}: {}", author, e),
                }
            }
            Message::Unknown => warn!("Got unknown message from {}", from),
        }
    }

    async fn mark_seen(&self, from: ConnectionId, uuid: &str) {
        if let Some(peer) = self.inner.peers.lock().await.get_mut(&from) {
            peer.mark_seen(uuid);
        }
    }

    async fn handle_handshake(&self, from: ConnectionId, name: &str) {
        let became_ready = match self.inner.peers.lock().await.get_mut(&from) {
            Some(peer) => peer.complete_handshake(name),
            None => false,
        };

        if became_ready {
            info!("Handshaked with peer {}", name);
            self.inner.waiters.lock().await.peer_ready(name);
            self.emit(NodeEvent::PeerReady {
                id: from,
                name: name.to_string(),
            });
        }
    }

    async fn handle_post(&self, from: ConnectionId, post: Post) {
        self.mark_seen(from, &post.uuid).await;

        // Tombstone check, first-seen check and save happen under one lock so
        // two peers delivering the same post cannot both count as first
        let outcome = {
            let mut store = self.inner.store.lock().await;
            Self::accept_post(&mut **store, &post)
        };

        let first_seen = match outcome {
            Ok(Some(first_seen)) => first_seen,
            Ok(None) => {
                debug!("Dropping post {} which was already deleted", post.uuid);
                return;
            }
            Err(e) => {
                warn!("Failed to store post {}: {}", post.uuid, e);
                return;
            }
        };

        self.inner.waiters.lock().await.message_stored(&post.uuid);

        if first_seen {
            debug!("New post {} from {}", post.uuid, post.author);
            self.emit(NodeEvent::PostReceived(post.clone()));
        }

        // Relay even known posts; peers that already have them are skipped
        self.fan_out(&Message::Post(post)).await;
    }

    /// Store a received post unless a tombstone for it is held.
    ///
    /// Returns `None` if the post was suppressed, otherwise whether it is new.
    fn accept_post(store: &mut dyn MessageStore, post: &Post) -> Result<Option<bool>, StoreError> {
        let record = StoredMessage::Post(post.clone());
        if store.has_deleted(&record)? {
            return Ok(None);
        }
        let known = store.contains(&post.uuid)?;
        store.save_if_not_deleted(record)?;
        Ok(Some(!known))
    }

    async fn handle_delete(&self, from: ConnectionId, delete: Delete) {
        self.mark_seen(from, &delete.uuid).await;

        let outcome = {
            let mut store = self.inner.store.lock().await;
            Self::apply_delete(&mut **store, &delete)
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Failed to apply delete {}: {}", delete.uuid, e);
                return;
            }
        };

        match &outcome {
            DeleteOutcome::Rejected { owner } => {
                warn!(
                    "Peer {} cannot delete {}'s message {}",
                    delete.author, owner, delete.post_uuid
                );
                return;
            }
            DeleteOutcome::Duplicate => debug!("Delete {} already processed", delete.uuid),
            DeleteOutcome::Early => debug!(
                "Holding delete {} for post {} not yet received",
                delete.uuid, delete.post_uuid
            ),
            DeleteOutcome::Applied => {
                info!("Deleting message {} from {}", delete.post_uuid, delete.author);
                self.emit(NodeEvent::PostDeleted {
                    post_uuid: delete.post_uuid.clone(),
                    author: delete.author.clone(),
                });
            }
        }

        self.inner.waiters.lock().await.message_stored(&delete.uuid);

        if matches!(outcome, DeleteOutcome::Applied) {
            self.fan_out(&Message::Delete(delete)).await;
        }
    }

    /// Decide on a received tombstone and apply it to the store.
    ///
    /// The tombstone itself is stored in every case except rejection.
    fn apply_delete(
        store: &mut dyn MessageStore,
        delete: &Delete,
    ) -> Result<DeleteOutcome, StoreError> {
        let outcome = if store.contains(&delete.uuid)? {
            DeleteOutcome::Duplicate
        } else {
            match store.get(&delete.post_uuid)? {
                None => DeleteOutcome::Early,
                Some(target) if target.author() != delete.author => {
                    return Ok(DeleteOutcome::Rejected {
                        owner: target.author().to_string(),
                    });
                }
                Some(_) => {
                    store.delete(&delete.post_uuid)?;
                    DeleteOutcome::Applied
                }
            }
        };

        store.save_if_not_deleted(StoredMessage::Delete(delete.clone()))?;
        Ok(outcome)
    }

    async fn handle_sync_request(&self, from: ConnectionId, has_uuids: Vec<String>) {
        let sender = {
            let mut peers = self.inner.peers.lock().await;
            let Some(peer) = peers.get_mut(&from) else {
                warn!("Sync request from unknown connection {}", from);
                return;
            };
            peer.replace_seen(has_uuids.iter().cloned());
            peer.sender()
        };

        let records = self.inner.store.lock().await.list();
        let records = match records {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to read store for sync with {}: {}", from, e);
                return;
            }
        };

        let has: HashSet<String> = has_uuids.into_iter().collect();
        let messages: Vec<Message> = records
            .into_iter()
            .filter(|(uuid, _)| !has.contains(uuid))
            .map(|(_, record)| Message::from(record))
            .collect();

        debug!("Answering sync from {} with {} records", from, messages.len());
        if let Err(e) = sender.send(&Message::SyncResponse { messages }).await {
            warn!("Failed to send sync response to {}: {}", from, e);
        }
    }

    async fn handle_sync_response(&self, from: ConnectionId, messages: Vec<Message>) {
        debug!("Applying sync response from {} ({} records)", from, messages.len());
        for message in messages {
            match message {
                Message::Post(post) => self.handle_post(from, post).await,
                Message::Delete(delete) => self.handle_delete(from, delete).await,
                other => warn!(
                    "Rejecting {} message nested in sync response from {}",
                    other.message_type(),
                    from
                ),
            }
        }
    }

    // ========================================================================
    // WAITING
    // ========================================================================

    /// Resolve once a ready peer with this display name is connected.
    ///
    /// Resolves immediately if one already is. Fails if the node closes first.
    pub async fn until_connected_with(&self, name: &str) -> Result<(), NodeError> {
        let waiter = {
            let mut waiters = self.inner.waiters.lock().await;
            self.ensure_open()?;
            if self.inner.peers.lock().await.has_ready_peer_named(name) {
                return Ok(());
            }
            waiters.wait_for_peer(name)
        };
        waiter.await.map_err(|_| NodeError::Closed)
    }

    /// Resolve once a record with this uuid is stored.
    ///
    /// Resolves immediately if it already is. Fails if the node closes first.
    pub async fn until_received_message(&self, uuid: &str) -> Result<(), NodeError> {
        let waiter = {
            let mut waiters = self.inner.waiters.lock().await;
            self.ensure_open()?;
            let stored = self.inner.store.lock().await.contains(uuid)?;
            if stored {
                return Ok(());
            }
            waiters.wait_for_message(uuid)
        };
        waiter.await.map_err(|_| NodeError::Closed)
    }

    // ========================================================================
    // EXPIRY
    // ========================================================================

    async fn expiry_loop(node: Weak<NodeInner>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(node) = Self::upgrade(&node) else {
                break;
            };
            if let Err(e) = node.expire_now().await {
                warn!("Expiry sweep failed: {}", e);
            }
        }
    }

    /// Run the expiry sweep with this node's TTL immediately
    pub async fn expire_now(&self) -> Result<usize, NodeError> {
        let timeout = self.inner.config.timeout_ms;
        let evicted = self
            .inner
            .store
            .lock()
            .await
            .delete_posts_older_than(now_millis(), timeout)?;

        if evicted > 0 {
            debug!("Expired {} posts", evicted);
            self.emit(NodeEvent::PostsExpired { count: evicted });
        }
        Ok(evicted)
    }
}
