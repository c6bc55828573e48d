//! Authenticated Encryption with Associated Data
//!
//! Uses ChaCha20-Poly1305 (96-bit nonce). Key size: 32 bytes. Tag: 16 bytes.
//!
//! Nonces are never transmitted. Each traffic direction keeps a sequence
//! number; the nonce for message `seq` is `base_nonce XOR I2OSP(seq, 12)`.
//! The sequence number only advances when an operation succeeds, so the
//! receiving side must open ciphertexts in exactly the order they were
//! sealed. A lost message makes every later one fail to open until the lost
//! ciphertext is delivered again byte-for-byte.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// One direction of traffic: key, base nonce and next sequence number.
#[derive(ZeroizeOnDrop)]
pub struct DirectionalKey {
    key: [u8; KEY_LEN],
    base_nonce: [u8; NONCE_LEN],
    seq: u64,
}

impl DirectionalKey {
    pub fn new(key: [u8; KEY_LEN], base_nonce: [u8; NONCE_LEN]) -> Self {
        Self { key, base_nonce, seq: 0 }
    }

    /// Number of successful operations so far.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    fn nonce(&self) -> [u8; NONCE_LEN] {
        let mut nonce = self.base_nonce;
        for (n, s) in nonce[NONCE_LEN - 8..].iter_mut().zip(self.seq.to_be_bytes()) {
            *n ^= s;
        }
        nonce
    }

    fn advance(&mut self) -> Result<(), CryptoError> {
        self.seq = self.seq.checked_add(1).ok_or(CryptoError::NonceExhausted)?;
        Ok(())
    }

    pub fn seal(&mut self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|_| CryptoError::AeadEncrypt)?;
        let nonce = self.nonce();
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
            .map_err(|_| CryptoError::AeadEncrypt)?;
        self.advance()?;
        Ok(ciphertext)
    }

    /// Failure leaves the sequence number untouched.
    pub fn open(&mut self, ciphertext: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if ciphertext.len() < TAG_LEN {
            return Err(CryptoError::AeadDecrypt);
        }
        let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|_| CryptoError::AeadDecrypt)?;
        let nonce = self.nonce();
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), Payload { msg: ciphertext, aad })
            .map_err(|_| CryptoError::AeadDecrypt)?;
        self.advance()?;
        Ok(Zeroizing::new(plaintext))
    }
}

/// Bidirectional cipher state: one key to seal with, one to open with.
pub struct CipherState {
    pub(crate) seal: DirectionalKey,
    pub(crate) open: DirectionalKey,
}

impl CipherState {
    pub fn new(seal: DirectionalKey, open: DirectionalKey) -> Self {
        Self { seal, open }
    }
}
