//! edm_client — everything between the crypto core and a chat front-end
//!
//! ```text
//! ChatContext ── DeliveryPolicy (BestEffort | Durable)
//!      │
//!  SessionCreator ── invites, handshakes
//!      │
//!  EncryptedSession / ReplaySession ── seal, frame, address
//!      │
//!  ReceiverTransport + SenderTransport ── relay (HTTP/SSE or in-memory)
//! ```
//!
//! All state is owned by tokio tasks or guarded by `parking_lot` locks that
//! are never held across an `.await`.

pub mod chat;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;

pub use chat::{
    BestEffort, ChatContext, ChatEvent, ChatLink, DeliveryPolicy, Durable, DurableChatContext,
};
pub use config::{ChatConfig, RelayConfig};
pub use error::{ChatError, SessionError, TransportError};
pub use session::{
    EncryptedSession, EncryptedSessionCreator, ReplaySession, ReplaySessionCreator, Session,
    SessionCreator, SessionEvent, SessionWithReplay,
};
pub use transport::{memory::MemoryRelay, http::HttpTransportCreator, TransportCreator};
