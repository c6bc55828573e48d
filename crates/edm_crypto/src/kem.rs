//! DHKEM(X25519, HKDF-SHA256) and the HPKE key schedule.
//!
//! Two modes are used:
//!   - base (0x00): anonymous sender. Used to seal the joiner's public key
//!     inside the handshake header.
//!   - auth (0x02): the sender also mixes in DH(sk_S, pk_R), so the recipient
//!     learns the context could only have been set up by the holder of sk_S.
//!
//!   dh            = DH(sk_E, pk_R) [|| DH(sk_S, pk_R)]
//!   kem_context   = enc || pk_R [|| pk_S]
//!   shared_secret = LabeledExpand(LabeledExtract("", "eae_prk", dh), "shared_secret", kem_context, 32)
//!
//! Key schedule (no PSK, empty info):
//!   secret          = LabeledExtract(shared_secret, "secret", "")
//!   key             = LabeledExpand(secret, "key", ks_context, 32)
//!   base_nonce      = LabeledExpand(secret, "base_nonce", ks_context, 12)
//!   exporter_secret = LabeledExpand(secret, "exp", ks_context, 32)

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, SharedSecret, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{
    aead::{DirectionalKey, NONCE_LEN},
    error::CryptoError,
    kdf::{labeled_expand, labeled_extract, KEM_SUITE_ID, SUITE_ID},
    keys::to_32,
};

pub const MODE_BASE: u8 = 0x00;
pub const MODE_AUTH: u8 = 0x02;

/// Length of the serialized encapsulated key (`enc`).
pub const ENC_LEN: usize = 32;

pub struct Encapsulation {
    pub shared_secret: Zeroizing<[u8; 32]>,
    pub enc: [u8; ENC_LEN],
}

fn checked_dh(shared: SharedSecret) -> Result<SharedSecret, CryptoError> {
    // All-zero output means a low-order point was supplied.
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKey("non-contributory Diffie-Hellman output".into()));
    }
    Ok(shared)
}

fn extract_and_expand(dh: &[u8], kem_context: &[u8]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let mut eae_prk = labeled_extract(KEM_SUITE_ID, &[], b"eae_prk", dh);
    let mut shared = Zeroizing::new([0u8; 32]);
    let res = labeled_expand(KEM_SUITE_ID, &eae_prk, b"shared_secret", kem_context, &mut shared[..]);
    eae_prk.zeroize();
    res.map(|_| shared)
}

/// Sender side. `sender` carries (sk_S, pk_S) for auth mode, `None` for base mode.
pub fn encap(
    recipient: &X25519Public,
    sender: Option<(&StaticSecret, &X25519Public)>,
) -> Result<Encapsulation, CryptoError> {
    let ephemeral = StaticSecret::random_from_rng(OsRng);
    let enc = X25519Public::from(&ephemeral).to_bytes();

    let mut dh = Zeroizing::new(Vec::with_capacity(64));
    dh.extend_from_slice(checked_dh(ephemeral.diffie_hellman(recipient))?.as_bytes());

    let mut kem_context = Vec::with_capacity(3 * 32);
    kem_context.extend_from_slice(&enc);
    kem_context.extend_from_slice(recipient.as_bytes());

    if let Some((sk_s, pk_s)) = sender {
        dh.extend_from_slice(checked_dh(sk_s.diffie_hellman(recipient))?.as_bytes());
        kem_context.extend_from_slice(pk_s.as_bytes());
    }

    Ok(Encapsulation {
        shared_secret: extract_and_expand(&dh, &kem_context)?,
        enc,
    })
}

/// Recipient side. `sender` is pk_S for auth mode, `None` for base mode.
pub fn decap(
    enc: &[u8],
    recipient: &StaticSecret,
    sender: Option<&X25519Public>,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let enc = to_32(enc)?;
    let pk_e = X25519Public::from(enc);
    let pk_r = X25519Public::from(recipient);

    let mut dh = Zeroizing::new(Vec::with_capacity(64));
    dh.extend_from_slice(checked_dh(recipient.diffie_hellman(&pk_e))?.as_bytes());

    let mut kem_context = Vec::with_capacity(3 * 32);
    kem_context.extend_from_slice(&enc);
    kem_context.extend_from_slice(pk_r.as_bytes());

    if let Some(pk_s) = sender {
        dh.extend_from_slice(checked_dh(recipient.diffie_hellman(pk_s))?.as_bytes());
        kem_context.extend_from_slice(pk_s.as_bytes());
    }

    extract_and_expand(&dh, &kem_context)
}

// ── Key schedule ─────────────────────────────────────────────────────────────

/// Output of the key schedule. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct KeySchedule {
    key: [u8; 32],
    base_nonce: [u8; NONCE_LEN],
    exporter_secret: [u8; 32],
}

impl KeySchedule {
    pub fn new(mode: u8, shared_secret: &[u8; 32]) -> Result<Self, CryptoError> {
        let psk_id_hash = labeled_extract(SUITE_ID, &[], b"psk_id_hash", &[]);
        let info_hash = labeled_extract(SUITE_ID, &[], b"info_hash", &[]);

        let mut ks_context = Vec::with_capacity(1 + 32 + 32);
        ks_context.push(mode);
        ks_context.extend_from_slice(&psk_id_hash);
        ks_context.extend_from_slice(&info_hash);

        let mut secret = labeled_extract(SUITE_ID, shared_secret, b"secret", &[]);

        let mut schedule = Self {
            key: [0u8; 32],
            base_nonce: [0u8; NONCE_LEN],
            exporter_secret: [0u8; 32],
        };
        let res = labeled_expand(SUITE_ID, &secret, b"key", &ks_context, &mut schedule.key)
            .and_then(|_| {
                labeled_expand(SUITE_ID, &secret, b"base_nonce", &ks_context, &mut schedule.base_nonce)
            })
            .and_then(|_| {
                labeled_expand(SUITE_ID, &secret, b"exp", &ks_context, &mut schedule.exporter_secret)
            });
        secret.zeroize();
        res.map(|_| schedule)
    }

    /// Secret export interface: `LabeledExpand(exporter_secret, "sec", context, L)`.
    pub fn export(&self, context: &[u8], output: &mut [u8]) -> Result<(), CryptoError> {
        labeled_expand(SUITE_ID, &self.exporter_secret, b"sec", context, output)
    }

    /// The sender → recipient traffic direction established by the schedule.
    pub fn forward_key(&self) -> DirectionalKey {
        DirectionalKey::new(self.key, self.base_nonce)
    }

    /// A second, independent direction keyed by exported seeds.
    pub fn reverse_key(&self, key_seed: &[u8], nonce_seed: &[u8]) -> Result<DirectionalKey, CryptoError> {
        let mut key = [0u8; 32];
        let mut base_nonce = [0u8; NONCE_LEN];
        self.export(key_seed, &mut key)?;
        self.export(nonce_seed, &mut base_nonce)?;
        let direction = DirectionalKey::new(key, base_nonce);
        key.zeroize();
        base_nonce.zeroize();
        Ok(direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_mode_agrees() {
        let sk_r = StaticSecret::random_from_rng(OsRng);
        let pk_r = X25519Public::from(&sk_r);

        let sent = encap(&pk_r, None).unwrap();
        let received = decap(&sent.enc, &sk_r, None).unwrap();
        assert_eq!(*sent.shared_secret, *received);
    }

    #[test]
    fn auth_mode_binds_sender() {
        let sk_r = StaticSecret::random_from_rng(OsRng);
        let pk_r = X25519Public::from(&sk_r);
        let sk_s = StaticSecret::random_from_rng(OsRng);
        let pk_s = X25519Public::from(&sk_s);
        let impostor = X25519Public::from(&StaticSecret::random_from_rng(OsRng));

        let sent = encap(&pk_r, Some((&sk_s, &pk_s))).unwrap();
        let genuine = decap(&sent.enc, &sk_r, Some(&pk_s)).unwrap();
        let forged = decap(&sent.enc, &sk_r, Some(&impostor)).unwrap();

        assert_eq!(*sent.shared_secret, *genuine);
        assert_ne!(*sent.shared_secret, *forged);
    }

    #[test]
    fn rejects_low_order_enc() {
        let sk_r = StaticSecret::random_from_rng(OsRng);
        assert!(decap(&[0u8; 32], &sk_r, None).is_err());
    }

    #[test]
    fn mode_changes_schedule() {
        let shared = [7u8; 32];
        let base = KeySchedule::new(MODE_BASE, &shared).unwrap();
        let auth = KeySchedule::new(MODE_AUTH, &shared).unwrap();
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        base.export(b"ctx", &mut a).unwrap();
        auth.export(b"ctx", &mut b).unwrap();
        assert_ne!(a, b);
    }
}
