//! The two handshake roles.
//!
//! ```text
//! Initiator                                   Joiner
//! ─────────                                   ──────
//! init(): ephemeral (sk_I, pk_I)
//! invite = pk_I, channel_id(pk_I)   ──────►   init_sender(pk_I, payload)
//!                                               ephemeral (sk_J, pk_J)
//!                                               AuthEncap(pk_I, sk_J) → enc, ctx
//!                                               init_ct = ctx.seal(payload, aad = channel_id(pk_I))
//!                                               Encap(pk_I) → hdr_enc, hdr_ctx
//!                                               pk_ct   = hdr_ctx.seal(pk_J, aad = init_ct)
//! handle_join(envelope)             ◄──────   [hdr_enc, pk_ct] . [enc, init_ct]
//!   pk_J = open(pk_ct, aad = init_ct)
//!   AuthDecap(enc, sk_I, pk_J) → ctx
//!   payload = ctx.open(init_ct)
//! ```
//!
//! Sealing pk_J with `init_ct` as associated data binds the two halves of the
//! envelope together, and the relay never sees the joiner's key in the clear.
//!
//! Both sides then export the same four values from the context: a key seed
//! and a nonce seed for the initiator → joiner direction, and one session id
//! per direction. The joiner → initiator direction uses the schedule's own
//! key and base nonce.

use x25519_dalek::PublicKey as X25519Public;
use zeroize::Zeroizing;

use crate::{
    aead::{CipherState, DirectionalKey},
    context::{ChannelId, CryptoContext, Envelope, Established, HandshakeEnvelope, CHANNEL_ID_LEN},
    error::CryptoError,
    kdf,
    kem::{self, KeySchedule, MODE_AUTH, MODE_BASE},
    keys::{ed25519_pub_to_x25519, to_32, EphemeralKeyPair, PUBLIC_KEY_LEN},
};

const EXPORT_LABEL_KEY: &[u8] = b"5edm key";
const EXPORT_LABEL_NONCE: &[u8] = b"5edm nonce";
const EXPORT_LABEL_SESSION_ID_RECIPIENT: &[u8] = b"5edm recipient session id";
const EXPORT_LABEL_SESSION_ID_SENDER: &[u8] = b"5edm sender session id";

/// Everything both roles derive from the authenticated context.
struct SessionKeys {
    forward: DirectionalKey,
    reverse: DirectionalKey,
    recipient_session_id: ChannelId,
    sender_session_id: ChannelId,
}

impl SessionKeys {
    fn derive(schedule: &KeySchedule) -> Result<Self, CryptoError> {
        let mut recipient = [0u8; CHANNEL_ID_LEN];
        let mut sender = [0u8; CHANNEL_ID_LEN];
        schedule.export(EXPORT_LABEL_SESSION_ID_RECIPIENT, &mut recipient)?;
        schedule.export(EXPORT_LABEL_SESSION_ID_SENDER, &mut sender)?;
        Ok(Self {
            forward: schedule.forward_key(),
            reverse: schedule.reverse_key(EXPORT_LABEL_KEY, EXPORT_LABEL_NONCE)?,
            recipient_session_id: ChannelId(recipient),
            sender_session_id: ChannelId(sender),
        })
    }
}

// ── Initiator ─────────────────────────────────────────────────────────────────

/// What the initiator shares out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InviteKey {
    pub public_key: [u8; PUBLIC_KEY_LEN],
    pub handshake_channel_id: ChannelId,
}

/// Result of a successful `handle_join`.
pub struct JoinAccepted {
    pub plaintext: Zeroizing<Vec<u8>>,
    pub session_id: ChannelId,
    pub to_session_id: ChannelId,
}

pub struct InitiatorContext {
    keypair: EphemeralKeyPair,
    handshake_channel_id: ChannelId,
    established: Option<Established>,
}

impl InitiatorContext {
    pub fn init() -> Self {
        let keypair = EphemeralKeyPair::generate();
        let handshake_channel_id = kdf::derive_channel_id(&keypair.public_bytes());
        Self {
            keypair,
            handshake_channel_id,
            established: None,
        }
    }

    pub fn invite(&self) -> InviteKey {
        InviteKey {
            public_key: self.public_key(),
            handshake_channel_id: self.handshake_channel_id,
        }
    }

    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.keypair.public_bytes()
    }

    pub fn handshake_channel_id(&self) -> ChannelId {
        self.handshake_channel_id
    }

    pub fn is_established(&self) -> bool {
        self.established.is_some()
    }

    /// Accept a joiner's first message.
    ///
    /// Any failure leaves the context exactly as it was, so the caller can
    /// keep waiting for a well-formed join.
    pub fn handle_join(&mut self, envelope: &HandshakeEnvelope) -> Result<JoinAccepted, CryptoError> {
        let pending = self.verify_join(envelope)?;
        self.commit_join(pending)
    }

    /// Open a join without touching the context. The caller inspects the
    /// plaintext and then either commits or drops the result.
    pub fn verify_join(&self, envelope: &HandshakeEnvelope) -> Result<PendingJoin, CryptoError> {
        if self.established.is_some() {
            return Err(CryptoError::AlreadyEstablished);
        }
        let [hdr_enc, pk_ct] = &envelope.header;
        let [enc, init_ct] = &envelope.payload;
        let sk = self.keypair.x25519_secret();

        let hdr_shared = kem::decap(hdr_enc, &sk, None)?;
        let joiner_pk = KeySchedule::new(MODE_BASE, &hdr_shared)?
            .forward_key()
            .open(pk_ct, init_ct)
            .map_err(|_| CryptoError::MalformedHandshake("sealed sender key did not open".into()))?;
        let joiner_pk = ed25519_pub_to_x25519(&to_32(&joiner_pk)?)?;

        let shared = kem::decap(enc, &sk, Some(&joiner_pk))?;
        let keys = SessionKeys::derive(&KeySchedule::new(MODE_AUTH, &shared)?)?;
        let mut established = Established {
            cipher: CipherState::new(keys.reverse, keys.forward),
            session_id: keys.recipient_session_id,
            to_session_id: keys.sender_session_id,
        };

        let plaintext = established
            .cipher
            .open
            .open(init_ct, self.handshake_channel_id.as_bytes())?;
        Ok(PendingJoin { established, plaintext })
    }

    pub fn commit_join(&mut self, pending: PendingJoin) -> Result<JoinAccepted, CryptoError> {
        if self.established.is_some() {
            return Err(CryptoError::AlreadyEstablished);
        }
        let PendingJoin { established, plaintext } = pending;
        let (session_id, to_session_id) = established.ids();
        self.established = Some(established);
        Ok(JoinAccepted {
            plaintext,
            session_id,
            to_session_id,
        })
    }
}

/// A join that opened but is not yet bound to its initiator.
pub struct PendingJoin {
    established: Established,
    plaintext: Zeroizing<Vec<u8>>,
}

impl PendingJoin {
    pub fn plaintext(&self) -> &[u8] {
        &self.plaintext
    }
}

impl CryptoContext for InitiatorContext {
    fn seal(&mut self, plaintext: &[u8], ad: Option<&[u8]>) -> Result<Envelope, CryptoError> {
        self.established
            .as_mut()
            .ok_or(CryptoError::NotInitialised)?
            .seal(plaintext, ad)
    }

    fn open(
        &mut self,
        payload: &[u8],
        header: &[u8],
        ad: Option<&[u8]>,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.established
            .as_mut()
            .ok_or(CryptoError::NotInitialised)?
            .open(payload, header, ad)
    }

    fn session_ids(&self) -> Option<(ChannelId, ChannelId)> {
        self.established.as_ref().map(Established::ids)
    }
}

// ── Joiner ────────────────────────────────────────────────────────────────────

/// Result of `init_sender`: the envelope to post and where to post it.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub envelope: HandshakeEnvelope,
    pub to_channel_id: ChannelId,
    pub session_id: ChannelId,
    pub to_session_id: ChannelId,
}

#[derive(Default)]
pub struct JoinerContext {
    to_channel_id: Option<ChannelId>,
    established: Option<Established>,
}

impl JoinerContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_channel_id(&self) -> Option<ChannelId> {
        self.to_channel_id
    }

    pub fn is_established(&self) -> bool {
        self.established.is_some()
    }

    /// Build the join envelope for the invite key `peer_public_key`.
    pub fn init_sender(
        &mut self,
        peer_public_key: &[u8],
        app_payload: &[u8],
    ) -> Result<JoinRequest, CryptoError> {
        if self.established.is_some() {
            return Err(CryptoError::AlreadyEstablished);
        }
        let peer_ed = to_32(peer_public_key)?;
        let peer = ed25519_pub_to_x25519(&peer_ed)?;

        let keypair = EphemeralKeyPair::generate();
        let sk = keypair.x25519_secret();
        let pk = X25519Public::from(&sk);

        let auth = kem::encap(&peer, Some((&sk, &pk)))?;
        let keys = SessionKeys::derive(&KeySchedule::new(MODE_AUTH, &auth.shared_secret)?)?;
        let mut established = Established {
            cipher: CipherState::new(keys.forward, keys.reverse),
            session_id: keys.sender_session_id,
            to_session_id: keys.recipient_session_id,
        };

        let to_channel_id = kdf::derive_channel_id(&peer_ed);
        let init_ct = established.cipher.seal.seal(app_payload, to_channel_id.as_bytes())?;

        let hdr = kem::encap(&peer, None)?;
        let pk_ct = KeySchedule::new(MODE_BASE, &hdr.shared_secret)?
            .forward_key()
            .seal(&keypair.public_bytes(), &init_ct)?;

        let (session_id, to_session_id) = established.ids();
        self.to_channel_id = Some(to_channel_id);
        self.established = Some(established);

        Ok(JoinRequest {
            envelope: HandshakeEnvelope {
                header: [hdr.enc.to_vec(), pk_ct],
                payload: [auth.enc.to_vec(), init_ct],
            },
            to_channel_id,
            session_id,
            to_session_id,
        })
    }
}

impl CryptoContext for JoinerContext {
    fn seal(&mut self, plaintext: &[u8], ad: Option<&[u8]>) -> Result<Envelope, CryptoError> {
        self.established
            .as_mut()
            .ok_or(CryptoError::NotInitialised)?
            .seal(plaintext, ad)
    }

    fn open(
        &mut self,
        payload: &[u8],
        header: &[u8],
        ad: Option<&[u8]>,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.established
            .as_mut()
            .ok_or(CryptoError::NotInitialised)?
            .open(payload, header, ad)
    }

    fn session_ids(&self) -> Option<(ChannelId, ChannelId)> {
        self.established.as_ref().map(Established::ids)
    }
}

// ── Either role ───────────────────────────────────────────────────────────────

/// The context a session owns, whichever side of the invite it is on.
pub enum PartyContext {
    Initiator(InitiatorContext),
    Joiner(JoinerContext),
}

impl PartyContext {
    pub fn as_initiator_mut(&mut self) -> Option<&mut InitiatorContext> {
        match self {
            Self::Initiator(ctx) => Some(ctx),
            Self::Joiner(_) => None,
        }
    }

    pub fn as_joiner_mut(&mut self) -> Option<&mut JoinerContext> {
        match self {
            Self::Joiner(ctx) => Some(ctx),
            Self::Initiator(_) => None,
        }
    }
}

impl CryptoContext for PartyContext {
    fn seal(&mut self, plaintext: &[u8], ad: Option<&[u8]>) -> Result<Envelope, CryptoError> {
        match self {
            Self::Initiator(ctx) => ctx.seal(plaintext, ad),
            Self::Joiner(ctx) => ctx.seal(plaintext, ad),
        }
    }

    fn open(
        &mut self,
        payload: &[u8],
        header: &[u8],
        ad: Option<&[u8]>,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        match self {
            Self::Initiator(ctx) => ctx.open(payload, header, ad),
            Self::Joiner(ctx) => ctx.open(payload, header, ad),
        }
    }

    fn session_ids(&self) -> Option<(ChannelId, ChannelId)> {
        match self {
            Self::Initiator(ctx) => ctx.session_ids(),
            Self::Joiner(ctx) => ctx.session_ids(),
        }
    }
}

impl From<InitiatorContext> for PartyContext {
    fn from(ctx: InitiatorContext) -> Self {
        Self::Initiator(ctx)
    }
}

impl From<JoinerContext> for PartyContext {
    fn from(ctx: JoinerContext) -> Self {
        Self::Joiner(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> (InitiatorContext, JoinerContext) {
        let mut initiator = InitiatorContext::init();
        let mut joiner = JoinerContext::new();
        let req = joiner
            .init_sender(&initiator.public_key(), b"join")
            .unwrap();
        initiator.handle_join(&req.envelope).unwrap();
        (initiator, joiner)
    }

    #[test]
    fn handshake_agrees_on_session_ids_and_payload() {
        let mut initiator = InitiatorContext::init();
        let mut joiner = JoinerContext::new();
        let invite = initiator.invite();

        let req = joiner.init_sender(&invite.public_key, b"hello").unwrap();
        assert_eq!(req.to_channel_id, invite.handshake_channel_id);

        let accepted = initiator.handle_join(&req.envelope).unwrap();
        assert_eq!(&accepted.plaintext[..], b"hello");
        assert_eq!(accepted.session_id, req.to_session_id);
        assert_eq!(accepted.to_session_id, req.session_id);
        assert_ne!(accepted.session_id, accepted.to_session_id);
    }

    #[test]
    fn hello_world_both_directions() {
        let (mut initiator, mut joiner) = connected();

        let env = initiator.seal(b"hello", None).unwrap();
        let pt = joiner.open(&env.payload, &env.header, None).unwrap();
        assert_eq!(&pt[..], b"hello");

        let env = joiner.seal(b"world", None).unwrap();
        let pt = initiator.open(&env.payload, &env.header, None).unwrap();
        assert_eq!(&pt[..], b"world");
    }

    #[test]
    fn header_addresses_recipient() {
        let (mut initiator, joiner) = connected();
        let (joiner_session, _) = joiner.session_ids().unwrap();
        let env = initiator.seal(b"x", None).unwrap();
        assert_eq!(env.header, joiner_session.0.to_vec());
    }

    #[test]
    fn associated_data_is_authenticated() {
        let (mut initiator, mut joiner) = connected();
        let env = initiator.seal(b"x", Some(b"extra")).unwrap();
        assert!(env.header.ends_with(b"extra"));
        assert!(joiner.open(&env.payload, &env.header, Some(b"other")).is_err());
        assert_eq!(&joiner.open(&env.payload, &env.header, None).unwrap()[..], b"x");
    }

    #[test]
    fn tampered_payload_or_header_rejected_without_side_effects() {
        let (mut initiator, mut joiner) = connected();
        let env = initiator.seal(b"secret", None).unwrap();

        let mut bad_payload = env.payload.clone();
        bad_payload[0] ^= 1;
        assert!(joiner.open(&bad_payload, &env.header, None).is_err());

        let mut bad_header = env.header.clone();
        bad_header[3] ^= 0x80;
        assert!(joiner.open(&env.payload, &bad_header, None).is_err());

        // Nothing advanced: the genuine ciphertext still opens.
        assert_eq!(&joiner.open(&env.payload, &env.header, None).unwrap()[..], b"secret");
    }

    #[test]
    fn tampered_join_is_rejected_and_initiator_can_retry() {
        let mut initiator = InitiatorContext::init();
        let mut joiner = JoinerContext::new();
        let req = joiner.init_sender(&initiator.public_key(), b"hi").unwrap();

        let mut bad = req.envelope.clone();
        bad.payload[1][0] ^= 1;
        assert!(initiator.handle_join(&bad).is_err());
        assert!(!initiator.is_established());

        let mut bad = req.envelope.clone();
        bad.header[1][0] ^= 1;
        assert!(initiator.handle_join(&bad).is_err());
        assert!(!initiator.is_established());

        assert!(initiator.handle_join(&req.envelope).is_ok());
    }

    #[test]
    fn dropped_pending_join_leaves_initiator_free() {
        let mut initiator = InitiatorContext::init();
        let pk = initiator.public_key();
        let rejected = JoinerContext::new().init_sender(&pk, b"rejected").unwrap();
        let genuine = JoinerContext::new().init_sender(&pk, b"genuine").unwrap();

        let pending = initiator.verify_join(&rejected.envelope).unwrap();
        assert_eq!(pending.plaintext(), b"rejected");
        drop(pending);
        assert!(!initiator.is_established());

        let accepted = initiator.handle_join(&genuine.envelope).unwrap();
        assert_eq!(&accepted.plaintext[..], b"genuine");
        assert_eq!(accepted.session_id, genuine.to_session_id);
    }

    #[test]
    fn envelope_halves_cannot_be_mixed() {
        let mut initiator = InitiatorContext::init();
        let pk = initiator.public_key();
        let a = JoinerContext::new().init_sender(&pk, b"a").unwrap();
        let b = JoinerContext::new().init_sender(&pk, b"b").unwrap();

        let mixed = HandshakeEnvelope {
            header: a.envelope.header.clone(),
            payload: b.envelope.payload.clone(),
        };
        assert!(initiator.handle_join(&mixed).is_err());
    }

    #[test]
    fn join_for_another_invite_fails() {
        let mut initiator = InitiatorContext::init();
        let other = InitiatorContext::init();
        let req = JoinerContext::new().init_sender(&other.public_key(), b"x").unwrap();
        assert!(initiator.handle_join(&req.envelope).is_err());
    }

    #[test]
    fn contexts_are_single_use() {
        let (mut initiator, mut joiner) = connected();
        let pk = initiator.public_key();
        let again = JoinerContext::new().init_sender(&pk, b"x").unwrap();
        assert!(matches!(
            initiator.handle_join(&again.envelope),
            Err(CryptoError::AlreadyEstablished)
        ));
        assert!(matches!(
            joiner.init_sender(&pk, b"x"),
            Err(CryptoError::AlreadyEstablished)
        ));
    }

    #[test]
    fn seal_before_handshake_fails() {
        let mut ctx = PartyContext::from(InitiatorContext::init());
        assert!(matches!(ctx.seal(b"x", None), Err(CryptoError::NotInitialised)));
        assert!(ctx.session_ids().is_none());
    }

    #[test]
    fn rejects_malformed_invite_key() {
        assert!(JoinerContext::new().init_sender(&[1u8; 31], b"x").is_err());
    }
}
