//! Ephemeral key material.
//!
//! Each role generates one Ed25519 keypair per conversation. The Ed25519
//! public half is what travels in the invite (it has a standard textual
//! identity encoding); key agreement runs on the birationally equivalent
//! X25519 keys.

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::error::CryptoError;

pub const PUBLIC_KEY_LEN: usize = 32;

pub(crate) fn to_32(bytes: &[u8]) -> Result<[u8; 32], CryptoError> {
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(format!("expected 32-byte key, got {}", bytes.len())))
}

/// Convert an Ed25519 signing key (32-byte seed) to an X25519 static secret.
/// Clamped SHA-512 expansion, the same scalar Ed25519 signs with.
pub fn ed25519_secret_to_x25519(ed_secret: &[u8; 32]) -> StaticSecret {
    use sha2::{Digest, Sha512};
    let mut h = Sha512::digest(ed_secret);
    // Clamp as per RFC 7748 §5
    h[0] &= 248;
    h[31] &= 127;
    h[31] |= 64;
    let mut key = [0u8; 32];
    key.copy_from_slice(&h[..32]);
    h.as_mut_slice().zeroize();
    let secret = StaticSecret::from(key);
    key.zeroize();
    secret
}

/// Convert an Ed25519 verifying key to an X25519 public key (Edwards → Montgomery).
pub fn ed25519_pub_to_x25519(ed_pub: &[u8; 32]) -> Result<X25519Public, CryptoError> {
    use curve25519_dalek::edwards::CompressedEdwardsY;
    let compressed = CompressedEdwardsY::from_slice(ed_pub)
        .map_err(|_| CryptoError::InvalidKey("invalid Ed25519 public key".into()))?;
    let point = compressed.decompress().ok_or_else(|| {
        CryptoError::InvalidKey("Ed25519 public key decompression failed".into())
    })?;
    Ok(X25519Public::from(point.to_montgomery().to_bytes()))
}

/// Single-use keypair owned by exactly one crypto context.
pub struct EphemeralKeyPair {
    signing: SigningKey,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Serialized Ed25519 public key, as shared in invites.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.signing.verifying_key().to_bytes()
    }

    pub(crate) fn x25519_secret(&self) -> StaticSecret {
        let mut seed = self.signing.to_bytes();
        let secret = ed25519_secret_to_x25519(&seed);
        seed.zeroize();
        secret
    }
}
