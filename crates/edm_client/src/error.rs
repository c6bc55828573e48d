use edm_crypto::CryptoError;
use edm_proto::ProtoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Could not send to {address} after {attempts} attempts")]
    SendExhausted { address: String, attempts: u32 },

    #[error("Relay unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not initialised")]
    NotInitialized,

    #[error("Wrong role: {0}")]
    WrongRole(&'static str),

    #[error("Invite not found")]
    InviteNotFound,

    #[error("Session has no addresses after handshake")]
    NotConnected,

    #[error("Handshake stream ended before a join arrived")]
    HandshakeAborted,

    #[error("Dispatch of request {request_id} failed: {source}")]
    Dispatch {
        request_id: u64,
        #[source]
        source: TransportError,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Protocol error: {0}")]
    Proto(#[from] ProtoError),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("No active session")]
    NoSession,

    #[error(transparent)]
    Session(#[from] SessionError),
}
