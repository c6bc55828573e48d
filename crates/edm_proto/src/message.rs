//! Chat messages: the plaintext inside every encrypted envelope.
//!
//! ```json
//! {"id": 4, "lastSeenId": 2, "type": "message", "msg": "hello"}
//! ```
//!
//! `id` is a per-sender counter starting at 1 (the join message uses 0) and
//! never reused. `lastSeenId` is the highest peer id the sender has received,
//! piggybacked on every message so the peer knows what to resend.

use serde::{Deserialize, Serialize};

/// Message kind, without its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Message,
    Ack,
    Disconnect,
    Meta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    /// User-visible text.
    Message { msg: String },
    /// Carries only the piggybacked `lastSeenId`.
    Ack,
    /// The sender is leaving; the session is over.
    Disconnect,
    /// Display name announcement.
    Meta { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: u64,
    pub last_seen_id: u64,
    #[serde(flatten)]
    pub body: MessageBody,
}

impl Message {
    pub fn new(id: u64, last_seen_id: u64, body: MessageBody) -> Self {
        Self { id, last_seen_id, body }
    }

    pub fn kind(&self) -> MessageType {
        self.body.kind()
    }
}

impl MessageBody {
    pub fn kind(&self) -> MessageType {
        match self {
            Self::Message { .. } => MessageType::Message,
            Self::Ack => MessageType::Ack,
            Self::Disconnect => MessageType::Disconnect,
            Self::Meta { .. } => MessageType::Meta,
        }
    }
}
