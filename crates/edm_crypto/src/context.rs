//! The crypto-context abstraction the session layer programs against.
//!
//! A context is created per conversation, goes through exactly one handshake,
//! and afterwards seals and opens ordered application traffic. Envelopes are
//! plain byte containers here; their textual wire form lives in `edm_proto`.

use std::fmt;

use zeroize::Zeroizing;

use crate::{aead::CipherState, error::CryptoError, kdf};

pub const CHANNEL_ID_LEN: usize = 16;

/// 16-byte relay address. Displayed as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub [u8; CHANNEL_ID_LEN]);

impl ChannelId {
    pub fn as_bytes(&self) -> &[u8; CHANNEL_ID_LEN] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let id: [u8; CHANNEL_ID_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!("channel id must be {CHANNEL_ID_LEN} bytes"))
        })?;
        Ok(Self(id))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({self})")
    }
}

/// Sealed application message.
///
/// `header` is the recipient's session id, optionally followed by extra
/// associated data; it is authenticated but not encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub header: Vec<u8>,
    pub payload: Vec<u8>,
}

/// First message of a conversation, sent by the joiner.
///
/// `header = [hdr_enc, pk_ct]` hides the joiner's public key from the relay;
/// `payload = [enc, init_ct]` carries the authenticated handshake and the
/// first application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeEnvelope {
    pub header: [Vec<u8>; 2],
    pub payload: [Vec<u8>; 2],
}

/// Operations available on a context once its handshake has completed.
pub trait CryptoContext {
    /// Seal `plaintext` for the peer. `ad` is appended to the header and
    /// authenticated alongside it.
    fn seal(&mut self, plaintext: &[u8], ad: Option<&[u8]>) -> Result<Envelope, CryptoError>;

    /// Open a payload sealed by the peer. `ad` must match the sender's.
    fn open(
        &mut self,
        payload: &[u8],
        header: &[u8],
        ad: Option<&[u8]>,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError>;

    /// `(session_id, to_session_id)` once established.
    fn session_ids(&self) -> Option<(ChannelId, ChannelId)>;

    fn derive_channel_id(&self, public_key: &[u8]) -> ChannelId {
        kdf::derive_channel_id(public_key)
    }
}

/// Post-handshake state shared by both roles.
pub struct Established {
    pub(crate) cipher: CipherState,
    pub(crate) session_id: ChannelId,
    pub(crate) to_session_id: ChannelId,
}

impl Established {
    pub(crate) fn seal(&mut self, plaintext: &[u8], ad: Option<&[u8]>) -> Result<Envelope, CryptoError> {
        let mut header = self.to_session_id.0.to_vec();
        if let Some(ad) = ad {
            header.extend_from_slice(ad);
        }
        let payload = self.cipher.seal.seal(plaintext, &header)?;
        Ok(Envelope { header, payload })
    }

    pub(crate) fn open(
        &mut self,
        payload: &[u8],
        header: &[u8],
        ad: Option<&[u8]>,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        match ad {
            Some(ad) => {
                let mut aad = Vec::with_capacity(header.len() + ad.len());
                aad.extend_from_slice(header);
                aad.extend_from_slice(ad);
                self.cipher.open.open(payload, &aad)
            }
            None => self.cipher.open.open(payload, header),
        }
    }

    pub(crate) fn ids(&self) -> (ChannelId, ChannelId) {
        (self.session_id, self.to_session_id)
    }
}
