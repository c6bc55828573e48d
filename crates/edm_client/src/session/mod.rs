//! Sessions: one encrypted, addressed conversation over a relay.
//!
//! A session owns exactly one crypto context and one transport pair. It is
//! created by a [`SessionCreator`], which runs the handshake and hands back
//! a session that already knows both of its addresses.

pub mod creator;
pub mod encrypted;
pub mod replay;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::mpsc;

use crate::{
    error::SessionError,
    transport::{ReadyState, SendResponse},
};

pub use creator::{
    EncryptedSessionCreator, EventCallback, FromEncrypted, Joined, ReplaySessionCreator,
    SessionCreator, SessionFactory,
};
pub use encrypted::EncryptedSession;
pub use replay::ReplaySession;

/// Anything a session can carry.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Relay addresses, URL-param encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAddresses {
    /// Where this side listens.
    pub session_id: String,
    /// Where this side sends.
    pub to_session_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent<M> {
    ChannelOpen { ready_state: ReadyState },
    ChannelError { ready_state: ReadyState },
    /// A message arrived but could not be decoded or opened. Never fatal.
    OpenError,
    Message(M),
    /// The joiner's first message. Terminal for `wait_for_join`.
    Handshake(M),
}

pub type SessionEventStream<M> = mpsc::UnboundedReceiver<SessionEvent<M>>;

/// Outcome of one send attempt. `request_id` identifies the attempt, not
/// the message: every call to `send` gets a fresh one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub request_id: u64,
    pub response: SendResponse,
}

#[async_trait]
pub trait Session<M: Payload>: Send + Sync {
    fn addresses(&self) -> Option<SessionAddresses>;

    /// Start receiving on this side's session id. Call once.
    fn listen(&self) -> Result<SessionEventStream<M>, SessionError>;

    async fn send(&self, message: &M) -> Result<SendReceipt, SessionError>;

    /// Close the receive side. Every stream from `listen` ends.
    async fn disconnect(&self);
}

/// A session that keeps the exact wire form of what it sent.
#[async_trait]
pub trait SessionWithReplay<M: Payload>: Session<M> {
    fn clear_cache(&self, request_ids: &[u64]);

    /// Post cached ciphertexts again, unchanged and in the given order.
    /// Ids with nothing cached are skipped.
    async fn resend_from_cache(&self, request_ids: &[u64]) -> Result<(), SessionError>;
}
