//! Relay transports.
//!
//! The relay is pure pub/sub keyed by address: whatever is posted to an
//! address goes to every stream currently open on it and is then gone. A
//! send with no listener is lost. Nothing here knows about encryption.
//!
//! - `ReceiverTransport::listen` opens one lazy, non-restartable stream of
//!   [`TransportEvent`]s per address. Reconnects show up in-band as
//!   `Error` followed by `Open`.
//! - `close` ends every stream the transport opened.
//! - `SenderTransport::send` posts one body, retrying internally.

pub mod http;
pub mod memory;
pub mod sse;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Connection state reported alongside open/error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open { ready_state: ReadyState },
    Error { ready_state: ReadyState },
    Data(String),
}

pub type TransportStream = mpsc::UnboundedReceiver<TransportEvent>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendResponse {
    pub ok: bool,
    pub status: u16,
    pub status_text: String,
}

#[async_trait]
pub trait ReceiverTransport: Send + Sync {
    /// Start receiving on `address`. The in-memory relay registers the
    /// subscription before returning; HTTP connects in the background and
    /// reports `Open` once the stream is live.
    fn listen(&self, address: &str) -> TransportStream;

    /// End every stream this receiver opened on `address`.
    fn unlisten(&self, address: &str);

    async fn close(&self);
}

#[async_trait]
pub trait SenderTransport: Send + Sync {
    async fn send(&self, body: &str, address: &str) -> Result<SendResponse, TransportError>;
}

/// Hands out a fresh transport pair per session.
pub trait TransportCreator: Send + Sync {
    fn create_receiver(&self) -> Box<dyn ReceiverTransport>;
    fn create_sender(&self) -> Box<dyn SenderTransport>;
}
