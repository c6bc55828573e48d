use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("AEAD encryption failed")]
    AeadEncrypt,

    #[error("AEAD decryption failed (authentication tag mismatch: tampered or out-of-order ciphertext)")]
    AeadDecrypt,

    #[error("Sequence number space exhausted for this direction")]
    NonceExhausted,

    #[error("Crypto context not initialised")]
    NotInitialised,

    #[error("Crypto context already completed its handshake")]
    AlreadyEstablished,

    #[error("Malformed handshake: {0}")]
    MalformedHandshake(String),
}
