//! Session creation: invites, waiting for a join, joining.
//!
//! An invite is the initiator's public key as a `did:key`. The creator keeps
//! each invite's initiator context until the first `wait_for_join` on it;
//! that call consumes it, so an invite accepts at most one joiner.

use std::{collections::HashMap, marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use edm_crypto::{InitiatorContext, JoinerContext, PartyContext};
use edm_proto::{DidKeyIdentity, Identity};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{EncryptedSession, Payload, ReplaySession, Session, SessionEvent};
use crate::{error::SessionError, transport::TransportCreator};

/// Outcome of a successful `wait_for_join`.
pub struct Joined<S, M> {
    pub join_message: M,
    pub session: S,
}

pub type EventCallback<'a, M> = &'a (dyn Fn(&SessionEvent<M>) + Send + Sync);

#[async_trait]
pub trait SessionCreator<M: Payload>: Send + Sync + 'static {
    type Session: Session<M> + 'static;

    /// Create a fresh initiator context and return its shareable invite.
    fn create_invite(&self) -> String;

    /// Wait for one joiner on `invite`. Channel events seen while waiting go
    /// to `on_event`; the handshake itself is returned, not reported.
    async fn wait_for_join(
        &self,
        invite: &str,
        on_event: Option<EventCallback<'_, M>>,
    ) -> Result<Joined<Self::Session, M>, SessionError>;

    async fn join_with_invite(&self, invite: &str, join_message: &M) -> Result<Self::Session, SessionError>;
}

/// Turns a freshly handshaken [`EncryptedSession`] into the session type a
/// creator hands out.
pub trait FromEncrypted<M>: Sized {
    fn from_encrypted(session: EncryptedSession<M>) -> Self;
}

impl<M: Payload> FromEncrypted<M> for EncryptedSession<M> {
    fn from_encrypted(session: EncryptedSession<M>) -> Self {
        session
    }
}

impl<M: Payload> FromEncrypted<M> for ReplaySession<M> {
    fn from_encrypted(session: EncryptedSession<M>) -> Self {
        ReplaySession::new(session)
    }
}

pub struct SessionFactory<M, S> {
    transports: Arc<dyn TransportCreator>,
    identity: Box<dyn Identity>,
    invites: Mutex<HashMap<String, InitiatorContext>>,
    _session: PhantomData<fn() -> (M, S)>,
}

pub type EncryptedSessionCreator<M> = SessionFactory<M, EncryptedSession<M>>;
pub type ReplaySessionCreator<M> = SessionFactory<M, ReplaySession<M>>;

impl<M, S> SessionFactory<M, S> {
    pub fn new(transports: Arc<dyn TransportCreator>) -> Self {
        Self::with_identity(transports, Box::new(DidKeyIdentity))
    }

    pub fn with_identity(transports: Arc<dyn TransportCreator>, identity: Box<dyn Identity>) -> Self {
        Self {
            transports,
            identity,
            invites: Mutex::new(HashMap::new()),
            _session: PhantomData,
        }
    }

    pub fn pending_invites(&self) -> usize {
        self.invites.lock().len()
    }

    fn session<P: Payload>(&self, crypto: PartyContext) -> EncryptedSession<P> {
        EncryptedSession::new(
            crypto,
            self.transports.create_receiver(),
            self.transports.create_sender(),
        )
    }
}

#[async_trait]
impl<M, S> SessionCreator<M> for SessionFactory<M, S>
where
    M: Payload,
    S: Session<M> + FromEncrypted<M> + 'static,
{
    type Session = S;

    fn create_invite(&self) -> String {
        let initiator = InitiatorContext::init();
        let invite = self.identity.encode(&initiator.public_key());
        debug!(channel = %initiator.handshake_channel_id(), "invite created");
        self.invites.lock().insert(invite.clone(), initiator);
        invite
    }

    async fn wait_for_join(
        &self,
        invite: &str,
        on_event: Option<EventCallback<'_, M>>,
    ) -> Result<Joined<S, M>, SessionError> {
        let initiator = self
            .invites
            .lock()
            .remove(invite)
            .ok_or(SessionError::InviteNotFound)?;
        let session = self.session::<M>(initiator.into());
        let mut events = session.wait_for_join()?;

        let join_message = loop {
            match events.recv().await {
                Some(SessionEvent::Handshake(message)) => break message,
                Some(event) => {
                    if let Some(on_event) = on_event {
                        on_event(&event);
                    }
                }
                None => return Err(SessionError::HandshakeAborted),
            }
        };
        if session.addresses().is_none() {
            return Err(SessionError::NotConnected);
        }
        info!("joiner connected");
        Ok(Joined {
            join_message,
            session: S::from_encrypted(session),
        })
    }

    async fn join_with_invite(&self, invite: &str, join_message: &M) -> Result<S, SessionError> {
        let invite_key = self.identity.decode(invite)?;
        let session = self.session::<M>(JoinerContext::new().into());
        session.join(&invite_key, join_message).await?;
        if session.addresses().is_none() {
            return Err(SessionError::NotConnected);
        }
        info!("joined invite");
        Ok(S::from_encrypted(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryRelay;
    use serde_json::{json, Value};

    fn creator(relay: &MemoryRelay) -> EncryptedSessionCreator<Value> {
        SessionFactory::new(Arc::new(relay.clone()))
    }

    #[tokio::test]
    async fn unknown_invite_is_rejected() {
        let relay = MemoryRelay::new();
        let c = creator(&relay);
        let res = c.wait_for_join("did:key:z6MkNope", None).await;
        assert!(matches!(res, Err(SessionError::InviteNotFound)));
    }

    #[tokio::test]
    async fn invite_is_consumed_by_first_wait() {
        let relay = MemoryRelay::new();
        let alice = creator(&relay);
        let bob = creator(&relay);
        let invite = alice.create_invite();
        assert!(invite.starts_with("did:key:z6Mk"));
        assert_eq!(alice.pending_invites(), 1);

        let opens = Mutex::new(0);
        let on_event = |e: &SessionEvent<Value>| {
            if matches!(e, SessionEvent::ChannelOpen { .. }) {
                *opens.lock() += 1;
            }
        };
        let join_message = json!({"name": "bob"});
        let (joined, joiner) = tokio::join!(
            alice.wait_for_join(&invite, Some(&on_event)),
            bob.join_with_invite(&invite, &join_message)
        );
        let joined = joined.unwrap();
        let joiner = joiner.unwrap();
        assert_eq!(joined.join_message, json!({"name": "bob"}));
        assert_eq!(*opens.lock(), 1);
        assert_eq!(
            joined.session.addresses().unwrap().session_id,
            joiner.addresses().unwrap().to_session_id
        );

        assert_eq!(alice.pending_invites(), 0);
        assert!(matches!(
            alice.wait_for_join(&invite, None).await,
            Err(SessionError::InviteNotFound)
        ));
    }

    #[tokio::test]
    async fn malformed_invite_fails_join() {
        let relay = MemoryRelay::new();
        let res = creator(&relay).join_with_invite("hello", &json!({})).await;
        assert!(matches!(res, Err(SessionError::Proto(_))));
    }
}
