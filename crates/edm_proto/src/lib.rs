//! edm_proto — wire types and encodings for 5EDM
//!
//! Everything the relay or the other party sees as text goes through here.
//! Nothing in this crate holds state; every encoding is a pure, invertible
//! function of its input.
//!
//! # Modules
//! - `envelope` — ciphertext envelopes ⇄ transport-safe strings
//! - `param`    — URL-safe encoding of channel and session addresses
//! - `identity` — invite public key ⇄ `did:key` identifier
//! - `message`  — chat messages carried inside the encrypted payload
//! - `codec`    — JSON internal format for those messages

pub mod codec;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod message;
pub mod param;

pub use envelope::{Base64EnvelopeEncoding, EnvelopeEncoding};
pub use error::ProtoError;
pub use identity::{DidKeyIdentity, Identity};
pub use message::{Message, MessageBody, MessageType};
