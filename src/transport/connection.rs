// Peer Connections - Per-socket state for every live peer
//
// A connection starts out handshaking, becomes ready once the remote side
// has sent its handshake, and is discarded when the socket closes. Each one
// remembers which message uuids have already crossed it.

use crate::sync::Message;
use crate::transport::framing::FrameWriter;
use futures::SinkExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::debug;

/// Port dialed when an address omits one
pub const DEFAULT_PORT: u16 = 8080;

// ============================================================================
// TRANSPORT ERRORS
// ============================================================================

/// Errors that can occur on a peer connection
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid connection id: {0}")]
    InvalidConnectionId(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Outbound queue full for {0}")]
    QueueFull(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl TransportError {
    /// Check if this is a connection-related error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_) | Self::IoError(_))
    }

    /// Check if this is a send-related error
    pub fn is_send_error(&self) -> bool {
        matches!(
            self,
            Self::SendFailed(_) | Self::QueueFull(_) | Self::SerializationError(_)
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

// ============================================================================
// PEER ADDRESS
// ============================================================================

/// A `host[:port]` a node can dial
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
}

impl PeerAddress {
    /// Create a TCP address
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }
}

impl FromStr for PeerAddress {
    type Err = TransportError;

    /// Parse `host:port`, falling back to port 8080 when the port is omitted
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| TransportError::InvalidAddress(s.to_string()))?;
                (host, port)
            }
            None => (s, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(TransportError::InvalidAddress(s.to_string()));
        }
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ============================================================================
// CONNECTION ID
// ============================================================================

/// Random identifier of one connection.
///
/// The same remote node reconnecting gets a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId([u8; 16]);

impl ConnectionId {
    /// Generate a new unique connection ID
    pub fn generate() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let mut bytes = [0u8; 16];
        rng.fill(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for ConnectionId {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim())
            .map_err(|_| TransportError::InvalidConnectionId(s.to_string()))?;
        let bytes: [u8; 16] = bytes
            .try_into()
            .map_err(|_| TransportError::InvalidConnectionId(s.to_string()))?;
        Ok(Self(bytes))
    }
}

// ============================================================================
// PEER STATUS
// ============================================================================

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerStatus {
    /// Socket is open, remote handshake not yet received
    Handshaking,
    /// Remote handshake received; ordinary traffic may flow
    Ready,
    /// Socket closed; terminal
    Closed,
}

impl PeerStatus {
    /// Check if transition to another state is valid
    pub fn can_transition_to(&self, target: &PeerStatus) -> bool {
        matches!(
            (self, target),
            (Self::Handshaking, Self::Ready)
                | (Self::Handshaking, Self::Closed)
                | (Self::Ready, Self::Closed)
        )
    }

    /// Check if the peer may receive broadcast traffic
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Handshaking => "handshaking",
            Self::Ready => "ready",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

// ============================================================================
// PEER SENDER
// ============================================================================

/// Outbound lines a connection may queue before it counts as stalled
pub const DEFAULT_OUTBOUND_QUEUE: usize = 1024;

/// Cloneable write side of a connection.
///
/// Lines go into a bounded queue drained by the connection's own writer task,
/// so a peer that stops reading never blocks whoever is sending to it.
#[derive(Clone)]
pub struct PeerSender {
    id: ConnectionId,
    queue: mpsc::Sender<String>,
}

impl PeerSender {
    /// Start the writer task for `writer` and return a handle feeding it
    pub fn spawn(id: ConnectionId, writer: FrameWriter, capacity: usize) -> (Self, JoinHandle<()>) {
        let (queue, outbound) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(write_loop(id, writer, outbound));
        (Self { id, queue }, task)
    }

    /// Get the connection ID
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue one message, waiting for room if the queue is full
    pub async fn send(&self, message: &Message) -> Result<(), TransportError> {
        let line = encode(message)?;
        self.queue
            .send(line)
            .await
            .map_err(|_| TransportError::SendFailed(format!("connection {} is closed", self.id)))
    }

    /// Queue one message without waiting.
    ///
    /// Fails with `QueueFull` when the peer has fallen too far behind.
    pub fn try_send(&self, message: &Message) -> Result<(), TransportError> {
        let line = encode(message)?;
        self.queue.try_send(line).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::QueueFull(self.id.to_string()),
            TrySendError::Closed(_) => {
                TransportError::SendFailed(format!("connection {} is closed", self.id))
            }
        })
    }
}

fn encode(message: &Message) -> Result<String, TransportError> {
    message
        .to_json()
        .map_err(|e| TransportError::SerializationError(e.to_string()))
}

/// Drain the queue onto the socket until every sender is gone or a write fails
async fn write_loop(id: ConnectionId, mut writer: FrameWriter, mut outbound: mpsc::Receiver<String>) {
    while let Some(line) = outbound.recv().await {
        if let Err(e) = writer.send(line).await {
            debug!("Write to {} failed: {}", id, e);
            return;
        }
    }
    if let Err(e) = SinkExt::<String>::close(&mut writer).await {
        debug!("Closing write half of {} failed: {}", id, e);
    }
}

// ============================================================================
// PEER CONNECTION
// ============================================================================

/// State of one live connection, owned by the node's peer table
pub struct PeerConnection {
    id: ConnectionId,
    remote_address: SocketAddr,
    status: PeerStatus,
    name: Option<String>,
    seen: HashSet<String>,
    sender: PeerSender,
    reader_task: Option<JoinHandle<()>>,
    writer_task: JoinHandle<()>,
}

impl PeerConnection {
    /// Create a new connection in the handshaking state
    pub fn new(id: ConnectionId, remote_address: SocketAddr, writer: FrameWriter) -> Self {
        Self::with_queue_capacity(id, remote_address, writer, DEFAULT_OUTBOUND_QUEUE)
    }

    /// Create a connection whose outbound queue holds `capacity` lines.
    ///
    /// Spawns the writer task, so this must run inside a tokio runtime.
    pub fn with_queue_capacity(
        id: ConnectionId,
        remote_address: SocketAddr,
        writer: FrameWriter,
        capacity: usize,
    ) -> Self {
        let (sender, writer_task) = PeerSender::spawn(id, writer, capacity);
        Self {
            id,
            remote_address,
            status: PeerStatus::Handshaking,
            name: None,
            seen: HashSet::new(),
            sender,
            reader_task: None,
            writer_task,
        }
    }

    /// Get the connection ID
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the remote socket address
    pub fn remote_address(&self) -> SocketAddr {
        self.remote_address
    }

    /// Get the current status
    pub fn status(&self) -> PeerStatus {
        self.status
    }

    /// Get the remote display name, known after the handshake
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Check if the peer may receive broadcast traffic
    pub fn is_ready(&self) -> bool {
        self.status.is_ready()
    }

    /// Apply a received handshake.
    ///
    /// Returns false when the peer was already past handshaking, in which
    /// case nothing changes.
    pub fn complete_handshake(&mut self, name: &str) -> bool {
        if !self.status.can_transition_to(&PeerStatus::Ready) {
            return false;
        }
        self.name = Some(name.to_string());
        self.status = PeerStatus::Ready;
        true
    }

    /// Record that a message uuid crossed this connection.
    ///
    /// Returns false if it was already recorded.
    pub fn mark_seen(&mut self, uuid: &str) -> bool {
        self.seen.insert(uuid.to_string())
    }

    /// Whether a message uuid already crossed this connection
    pub fn has_seen(&self, uuid: &str) -> bool {
        self.seen.contains(uuid)
    }

    /// Replace the seen set with the peer's own report
    pub fn replace_seen<I>(&mut self, uuids: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.seen = uuids.into_iter().collect();
    }

    /// Number of uuids in the seen set
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Get a handle for sending to this peer
    pub fn sender(&self) -> PeerSender {
        self.sender.clone()
    }

    /// Attach the task reading this connection's socket
    pub fn set_reader_task(&mut self, handle: JoinHandle<()>) {
        self.reader_task = Some(handle);
    }

    /// Tear down the socket; the connection becomes closed.
    ///
    /// Queued lines are discarded, and a write stuck on a peer that stopped
    /// reading is abandoned.
    pub fn close(&mut self) {
        self.status = PeerStatus::Closed;
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        self.writer_task.abort();
    }

    /// Socket-free snapshot of this connection
    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id,
            remote_address: self.remote_address,
            status: self.status,
            name: self.name.clone(),
            seen_count: self.seen.len(),
        }
    }
}

/// Information about a live connection, safe to print or serialize
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: ConnectionId,
    pub remote_address: SocketAddr,
    pub status: PeerStatus,
    pub name: Option<String>,
    pub seen_count: usize,
}
