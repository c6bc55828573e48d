//! edm_crypto — 5EDM handshake and session cipher primitives
//!
//! # Design principles
//! - NO custom primitives; X25519, Ed25519, HKDF-SHA256 and ChaCha20-Poly1305
//!   come from audited Rust crates. Only the composition lives here.
//! - Every key is ephemeral: one keypair per role per conversation.
//! - Secret material is zeroized on drop.
//!
//! # Module layout
//! - `keys`      — ephemeral Ed25519 keypairs + Ed25519 → X25519 conversion
//! - `kdf`       — labeled HKDF (HPKE style) and channel id derivation
//! - `kem`       — DHKEM(X25519, HKDF-SHA256), base and auth modes
//! - `aead`      — sequence-numbered ChaCha20-Poly1305 directions
//! - `context`   — `CryptoContext` capability, envelopes, channel ids
//! - `handshake` — Initiator / Joiner roles
//! - `error`     — unified error type

pub mod aead;
pub mod context;
pub mod error;
pub mod handshake;
pub mod kdf;
pub mod kem;
pub mod keys;

pub use context::{ChannelId, CryptoContext, Envelope, HandshakeEnvelope, CHANNEL_ID_LEN};
pub use error::CryptoError;
pub use handshake::{
    InitiatorContext, InviteKey, JoinAccepted, JoinRequest, JoinerContext, PartyContext, PendingJoin,
};
