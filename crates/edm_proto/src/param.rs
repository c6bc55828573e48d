//! URL-parameter encoding for relay addresses.
//!
//! Channel and session ids travel in query strings, so they use the URL-safe
//! base64 alphabet without padding.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use edm_crypto::ChannelId;

use crate::error::ProtoError;

pub fn encode_url_param(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn decode_url_param(param: &str) -> Result<Vec<u8>, ProtoError> {
    Ok(URL_SAFE_NO_PAD.decode(param)?)
}

/// The relay address of a channel or session id.
pub fn address_of(id: &ChannelId) -> String {
    encode_url_param(id.as_bytes())
}
