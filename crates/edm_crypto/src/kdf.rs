//! Key derivation functions
//!
//! Labeled HKDF-SHA256 in the shape used by RFC 9180 (HPKE):
//!
//!   LabeledExtract(salt, label, ikm)      = Extract(salt, "HPKE-v1" || suite_id || label || ikm)
//!   LabeledExpand(prk, label, info, L)    = Expand(prk, I2OSP(L, 2) || "HPKE-v1" || suite_id || label || info, L)
//!
//! `suite_id` separates the KEM from the rest of the key schedule, so a value
//! derived for one purpose can never be replayed as another.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::{
    context::{ChannelId, CHANNEL_ID_LEN},
    error::CryptoError,
};

const VERSION_LABEL: &[u8] = b"HPKE-v1";

/// KEM suite: "KEM" || DHKEM(X25519, HKDF-SHA256)
pub const KEM_SUITE_ID: &[u8] = b"KEM\x00\x20";

/// Full suite: "HPKE" || KEM 0x0020 || KDF 0x0001 (HKDF-SHA256) || AEAD 0x0003 (ChaCha20-Poly1305)
pub const SUITE_ID: &[u8] = b"HPKE\x00\x20\x00\x01\x00\x03";

const LABEL_CHANNEL_ID: &[u8] = b"channel_id";

// ── Labeled HKDF ──────────────────────────────────────────────────────────────

pub fn labeled_extract(suite_id: &[u8], salt: &[u8], label: &[u8], ikm: &[u8]) -> [u8; 32] {
    let mut labeled_ikm =
        Vec::with_capacity(VERSION_LABEL.len() + suite_id.len() + label.len() + ikm.len());
    labeled_ikm.extend_from_slice(VERSION_LABEL);
    labeled_ikm.extend_from_slice(suite_id);
    labeled_ikm.extend_from_slice(label);
    labeled_ikm.extend_from_slice(ikm);

    let (prk, _) = Hkdf::<Sha256>::extract(Some(salt), &labeled_ikm);
    let mut out = [0u8; 32];
    out.copy_from_slice(&prk);
    out
}

pub fn labeled_expand(
    suite_id: &[u8],
    prk: &[u8; 32],
    label: &[u8],
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let len = u16::try_from(output.len())
        .map_err(|_| CryptoError::KeyDerivation("requested output too long".into()))?;

    let mut labeled_info =
        Vec::with_capacity(2 + VERSION_LABEL.len() + suite_id.len() + label.len() + info.len());
    labeled_info.extend_from_slice(&len.to_be_bytes());
    labeled_info.extend_from_slice(VERSION_LABEL);
    labeled_info.extend_from_slice(suite_id);
    labeled_info.extend_from_slice(label);
    labeled_info.extend_from_slice(info);

    let hk = Hkdf::<Sha256>::from_prk(prk)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    hk.expand(&labeled_info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

// ── Channel ids ───────────────────────────────────────────────────────────────

/// Derive the 16-byte relay address for a serialized public key.
///
/// Both parties can compute this from the invite alone, which is what lets
/// the joiner reach the initiator before any secret is shared.
pub fn derive_channel_id(public_key: &[u8]) -> ChannelId {
    let raw = labeled_extract(SUITE_ID, &[], LABEL_CHANNEL_ID, public_key);
    let mut id = [0u8; CHANNEL_ID_LEN];
    id.copy_from_slice(&raw[..CHANNEL_ID_LEN]);
    ChannelId(id)
}
