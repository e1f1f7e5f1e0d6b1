// Protocol - Message types exchanged between board nodes
//
// Defines the wire format for everything two peers say to each other:
// - Handshake: first message on every connection, carries a display name
// - Post/Delete: the storable records (notes and their tombstones)
// - SyncRequest/SyncResponse: pull-based anti-entropy
// - MessagePreserve: author-wide lifetime extension
//
// Every message is one JSON object tagged by its `type` field.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Current wall clock in milliseconds since the unix epoch
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Mint a fresh random message identifier
pub fn new_message_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// Protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Encoding failed: {0}")]
    EncodeFailed(String),

    #[error("Decoding failed: {0}")]
    DecodeFailed(String),
}

/// Discriminant of a [`Message`], used for logging and error reporting
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    Handshake,
    Post,
    Delete,
    SyncRequest,
    SyncResponse,
    MessagePreserve,
    Unknown,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Handshake => "handshake",
            Self::Post => "post",
            Self::Delete => "delete",
            Self::SyncRequest => "syncrequest",
            Self::SyncResponse => "syncresponse",
            Self::MessagePreserve => "messagepreserve",
            Self::Unknown => "unknown",
        };
        f.write_str(tag)
    }
}

// ============================================================================
// POST
// ============================================================================

/// A user-authored note.
///
/// `refresh_time` is the instant the post's remaining lifetime is measured
/// from. `custom_timeout` is the author's own TTL in milliseconds, honored by
/// every node regardless of that node's configured TTL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub author: String,
    pub content: String,
    pub sent_time: u64,
    pub refresh_time: u64,
    pub custom_timeout: u64,
    pub uuid: String,
}

impl Post {
    /// Create a new post stamped with the current time and a fresh uuid
    pub fn new(author: &str, content: &str, custom_timeout: u64) -> Self {
        let now = now_millis();
        Self {
            author: author.to_string(),
            content: content.to_string(),
            sent_time: now,
            refresh_time: now,
            custom_timeout,
            uuid: new_message_uuid(),
        }
    }

    /// Override the send and refresh timestamps
    pub fn with_times(mut self, sent_time: u64, refresh_time: u64) -> Self {
        self.sent_time = sent_time;
        self.refresh_time = refresh_time;
        self
    }

    /// Override the identifier
    pub fn with_uuid(mut self, uuid: &str) -> Self {
        self.uuid = uuid.to_string();
        self
    }

    /// Whether this post has outlived either the node TTL or its own TTL at `now`
    pub fn is_expired(&self, now: u64, node_timeout: u64) -> bool {
        now > self.refresh_time.saturating_add(node_timeout)
            || now > self.refresh_time.saturating_add(self.custom_timeout)
    }
}

// ============================================================================
// DELETE
// ============================================================================

/// A tombstone: evidence that `post_uuid` was removed by `author`.
///
/// A tombstone has its own `uuid`; it refers to its target only through
/// `post_uuid`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delete {
    pub author: String,
    pub post_uuid: String,
    pub sent_time: u64,
    pub uuid: String,
}

impl Delete {
    /// Create a new tombstone for `post_uuid`
    pub fn new(author: &str, post_uuid: &str) -> Self {
        Self {
            author: author.to_string(),
            post_uuid: post_uuid.to_string(),
            sent_time: now_millis(),
            uuid: new_message_uuid(),
        }
    }

    /// Override the identifier
    pub fn with_uuid(mut self, uuid: &str) -> Self {
        self.uuid = uuid.to_string();
        self
    }
}

// ============================================================================
// MESSAGE
// ============================================================================

/// Every message of the protocol.
///
/// Unknown `type` tags decode to [`Message::Unknown`] instead of failing, so
/// that newer peers can talk to older ones.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Handshake { name: String },
    Post(Post),
    Delete(Delete),
    SyncRequest { has_uuids: Vec<String> },
    SyncResponse { messages: Vec<Message> },
    MessagePreserve { author: String, sent_time: u64 },
    #[serde(other)]
    Unknown,
}

impl Message {
    /// Get the message type
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Handshake { .. } => MessageType::Handshake,
            Message::Post(_) => MessageType::Post,
            Message::Delete(_) => MessageType::Delete,
            Message::SyncRequest { .. } => MessageType::SyncRequest,
            Message::SyncResponse { .. } => MessageType::SyncResponse,
            Message::MessagePreserve { .. } => MessageType::MessagePreserve,
            Message::Unknown => MessageType::Unknown,
        }
    }

    /// Identifier of a storable message
    pub fn uuid(&self) -> Option<&str> {
        match self {
            Message::Post(post) => Some(&post.uuid),
            Message::Delete(delete) => Some(&delete.uuid),
            _ => None,
        }
    }

    /// Whether this message is persisted by the store
    pub fn is_storable(&self) -> bool {
        matches!(self, Message::Post(_) | Message::Delete(_))
    }

    /// Convert into a storable record, if this is one
    pub fn to_stored(&self) -> Option<StoredMessage> {
        match self {
            Message::Post(post) => Some(StoredMessage::Post(post.clone())),
            Message::Delete(delete) => Some(StoredMessage::Delete(delete.clone())),
            _ => None,
        }
    }

    /// Serialize to a single line of JSON (no trailing newline)
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::EncodeFailed(e.to_string()))
    }

    /// Deserialize from JSON
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DecodeFailed(e.to_string()))
    }
}

impl From<StoredMessage> for Message {
    fn from(stored: StoredMessage) -> Self {
        match stored {
            StoredMessage::Post(post) => Message::Post(post),
            StoredMessage::Delete(delete) => Message::Delete(delete),
        }
    }
}

// ============================================================================
// STORED MESSAGE
// ============================================================================

/// The subset of messages a store persists.
///
/// Serializes to exactly the same JSON object as the matching [`Message`]
/// variant, so the on-disk layout mirrors the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoredMessage {
    Post(Post),
    Delete(Delete),
}

impl StoredMessage {
    /// The record's own identifier
    pub fn uuid(&self) -> &str {
        match self {
            StoredMessage::Post(post) => &post.uuid,
            StoredMessage::Delete(delete) => &delete.uuid,
        }
    }

    /// The record's claimed author
    pub fn author(&self) -> &str {
        match self {
            StoredMessage::Post(post) => &post.author,
            StoredMessage::Delete(delete) => &delete.author,
        }
    }

    pub fn as_post(&self) -> Option<&Post> {
        match self {
            StoredMessage::Post(post) => Some(post),
            StoredMessage::Delete(_) => None,
        }
    }

    pub fn as_delete(&self) -> Option<&Delete> {
        match self {
            StoredMessage::Delete(delete) => Some(delete),
            StoredMessage::Post(_) => None,
        }
    }

    /// Whether this record is a tombstone covering `target`.
    ///
    /// Only a tombstone signed by the target's own author counts.
    pub fn is_tombstone_for(&self, target: &StoredMessage) -> bool {
        match self {
            StoredMessage::Delete(delete) => {
                delete.post_uuid == target.uuid() && delete.author == target.author()
            }
            StoredMessage::Post(_) => false,
        }
    }

    /// Serialize to JSON bytes
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::EncodeFailed(e.to_string()))
    }

    /// Deserialize from JSON bytes
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::DecodeFailed(e.to_string()))
    }
}
