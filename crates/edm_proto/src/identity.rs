//! Invite identities.
//!
//! The invite carries the initiator's ephemeral Ed25519 public key as a
//! `did:key` identifier: `did:key:z` + base58btc(0xed 0x01 || public_key).
//! The `0xed01` prefix is the multicodec varint for an Ed25519 public key.

use edm_crypto::keys::PUBLIC_KEY_LEN;

use crate::error::ProtoError;

const DID_KEY_PREFIX: &str = "did:key:z";
const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];

/// Public key ⇄ shareable string.
pub trait Identity: Send + Sync {
    fn encode(&self, public_key: &[u8]) -> String;
    fn decode(&self, encoded: &str) -> Result<Vec<u8>, ProtoError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DidKeyIdentity;

impl Identity for DidKeyIdentity {
    fn encode(&self, public_key: &[u8]) -> String {
        let mut bytes = Vec::with_capacity(ED25519_MULTICODEC.len() + public_key.len());
        bytes.extend_from_slice(&ED25519_MULTICODEC);
        bytes.extend_from_slice(public_key);
        format!("{DID_KEY_PREFIX}{}", bs58::encode(bytes).into_string())
    }

    fn decode(&self, encoded: &str) -> Result<Vec<u8>, ProtoError> {
        let body = encoded
            .strip_prefix(DID_KEY_PREFIX)
            .ok_or_else(|| ProtoError::InvalidIdentity("not a base58btc did:key".into()))?;
        let bytes = bs58::decode(body)
            .into_vec()
            .map_err(|e| ProtoError::InvalidIdentity(e.to_string()))?;
        let key = bytes
            .strip_prefix(&ED25519_MULTICODEC[..])
            .ok_or_else(|| ProtoError::InvalidIdentity("not an Ed25519 key".into()))?;
        if key.len() != PUBLIC_KEY_LEN {
            return Err(ProtoError::InvalidIdentity(format!(
                "Ed25519 key must be {PUBLIC_KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        Ok(key.to_vec())
    }
}

/// Human-comparable fingerprint of an invite key: BLAKE3, truncated to
/// 20 bytes, hex in groups of 4.
pub fn fingerprint(public_key: &[u8]) -> String {
    let hash = blake3::hash(public_key);
    let hex = hex::encode(&hash.as_bytes()[..20]);
    hex.as_bytes()
        .chunks(4)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_did_key_vector() {
        // From the did:key method test vectors.
        let did = "did:key:z6MkiTBz1ymuepAQ4HEHYSF1H8quG5GLVVQR3djdX3mDooWp";
        let key = DidKeyIdentity.decode(did).unwrap();
        assert_eq!(key.len(), 32);
        assert_eq!(DidKeyIdentity.encode(&key), did);
    }

    #[test]
    fn encoded_keys_start_with_z6mk() {
        let did = DidKeyIdentity.encode(&[7u8; 32]);
        assert!(did.starts_with("did:key:z6Mk"));
        assert_eq!(DidKeyIdentity.decode(&did).unwrap(), vec![7u8; 32]);
    }

    #[test]
    fn rejects_foreign_identifiers() {
        assert!(DidKeyIdentity.decode("did:web:example.com").is_err());
        assert!(DidKeyIdentity.decode("did:key:z0OIl").is_err());
        let short = DidKeyIdentity.encode(&[7u8; 31]);
        assert!(DidKeyIdentity.decode(&short).is_err());
    }

    #[test]
    fn fingerprint_is_grouped_hex() {
        let fp = fingerprint(&[1u8; 32]);
        assert_eq!(fp.split(' ').count(), 10);
        assert!(fp.split(' ').all(|g| g.len() == 4));
        assert_ne!(fp, fingerprint(&[2u8; 32]));
    }
}
