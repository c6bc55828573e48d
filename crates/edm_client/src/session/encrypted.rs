//! The encrypted session.
//!
//! Wire path, outbound: message → JSON → seal → envelope → base64 string →
//! `SenderTransport::send(to_session_id)`. Inbound is the exact inverse on
//! `session_id`. The handshake uses the initiator's handshake channel id
//! instead, and a `HandshakeEnvelope`.
//!
//! Sends are serialised: sealing and posting happen under one async lock so
//! ciphertexts reach the relay in sequence-number order.
//!
//! As soon as a side knows its session id it subscribes to it, before the
//! joiner posts its join and before the initiator reports the handshake.
//! The first `listen` picks that subscription up, so nothing the peer sends
//! right after the handshake is lost to the relay's lack of buffering.

use std::{
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use edm_crypto::{ChannelId, CryptoContext, PartyContext};
use edm_proto::{
    codec::{decode_json, encode_json},
    param::address_of,
    Base64EnvelopeEncoding, EnvelopeEncoding,
};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use super::{Payload, SendReceipt, Session, SessionAddresses, SessionEvent, SessionEventStream};
use crate::{
    error::SessionError,
    transport::{ReceiverTransport, SenderTransport, TransportEvent, TransportStream},
};

struct SessionCore {
    crypto: Mutex<PartyContext>,
    receiver: Box<dyn ReceiverTransport>,
    sender: Box<dyn SenderTransport>,
    wire: Box<dyn EnvelopeEncoding>,
    addresses: Mutex<Option<SessionAddresses>>,
    /// Subscription opened at handshake time, consumed by the first `listen`.
    early: Mutex<Option<TransportStream>>,
    next_request_id: AtomicU64,
    send_order: AsyncMutex<()>,
}

impl SessionCore {
    fn establish(&self, session_id: &ChannelId, to_session_id: &ChannelId) {
        let addresses = SessionAddresses {
            session_id: address_of(session_id),
            to_session_id: address_of(to_session_id),
        };
        debug!(session_id = %addresses.session_id, to_session_id = %addresses.to_session_id, "session established");
        *self.early.lock() = Some(self.receiver.listen(&addresses.session_id));
        *self.addresses.lock() = Some(addresses);
    }

    fn to_address(&self) -> Result<String, SessionError> {
        self.addresses
            .lock()
            .as_ref()
            .map(|a| a.to_session_id.clone())
            .ok_or(SessionError::NotInitialized)
    }

    /// Nothing is committed unless the join opens and its payload decodes.
    fn accept_join<M: DeserializeOwned>(&self, data: &str) -> Result<M, SessionError> {
        let envelope = self.wire.decode_handshake_envelope(data)?;
        let (message, accepted) = {
            let mut crypto = self.crypto.lock();
            let initiator = crypto
                .as_initiator_mut()
                .ok_or(SessionError::WrongRole("only the initiator accepts joins"))?;
            let pending = initiator.verify_join(&envelope)?;
            let message: M = decode_json(pending.plaintext())?;
            (message, initiator.commit_join(pending)?)
        };
        self.establish(&accepted.session_id, &accepted.to_session_id);
        Ok(message)
    }

    fn seal_message<M: Serialize>(&self, message: &M) -> Result<String, SessionError> {
        let plaintext = encode_json(message)?;
        let envelope = self.crypto.lock().seal(&plaintext, None)?;
        Ok(self.wire.encode_envelope(&envelope))
    }

    fn open_message<M: DeserializeOwned>(&self, data: &str) -> Result<M, SessionError> {
        let envelope = self.wire.decode_envelope(data)?;
        let plaintext = self
            .crypto
            .lock()
            .open(&envelope.payload, &envelope.header, None)?;
        Ok(decode_json(&plaintext)?)
    }
}

pub struct EncryptedSession<M> {
    core: Arc<SessionCore>,
    _message: PhantomData<fn() -> M>,
}

impl<M: Payload> EncryptedSession<M> {
    pub fn new(
        crypto: PartyContext,
        receiver: Box<dyn ReceiverTransport>,
        sender: Box<dyn SenderTransport>,
    ) -> Self {
        Self::with_encoding(crypto, receiver, sender, Box::new(Base64EnvelopeEncoding))
    }

    pub fn with_encoding(
        crypto: PartyContext,
        receiver: Box<dyn ReceiverTransport>,
        sender: Box<dyn SenderTransport>,
        wire: Box<dyn EnvelopeEncoding>,
    ) -> Self {
        Self {
            core: Arc::new(SessionCore {
                crypto: Mutex::new(crypto),
                receiver,
                sender,
                wire,
                addresses: Mutex::new(None),
                early: Mutex::new(None),
                next_request_id: AtomicU64::new(0),
                send_order: AsyncMutex::new(()),
            }),
            _message: PhantomData,
        }
    }

    /// Initiator only. Listens on the handshake channel until one join
    /// opens; the stream ends right after the `Handshake` event.
    ///
    /// Data that is not a valid join for this invite is logged and skipped.
    pub fn wait_for_join(&self) -> Result<SessionEventStream<M>, SessionError> {
        let channel = {
            let mut crypto = self.core.crypto.lock();
            let initiator = crypto
                .as_initiator_mut()
                .ok_or(SessionError::WrongRole("only the initiator accepts joins"))?;
            address_of(&initiator.handshake_channel_id())
        };
        let mut transport = self.core.receiver.listen(&channel);
        let (tx, rx) = mpsc::unbounded_channel();
        let core = self.core.clone();
        tokio::spawn(async move {
            while let Some(event) = transport.recv().await {
                let out = match event {
                    TransportEvent::Open { ready_state } => SessionEvent::ChannelOpen { ready_state },
                    TransportEvent::Error { ready_state } => SessionEvent::ChannelError { ready_state },
                    TransportEvent::Data(data) => match core.accept_join::<M>(&data) {
                        Ok(message) => {
                            info!("join accepted");
                            core.receiver.unlisten(&channel);
                            let _ = tx.send(SessionEvent::Handshake(message));
                            return;
                        }
                        Err(err) => {
                            warn!(error = %err, "ignoring data on handshake channel");
                            continue;
                        }
                    },
                };
                if tx.send(out).is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    /// Joiner only. Runs the handshake against `invite_key` with `initial`
    /// as the first message and posts it to the initiator's handshake channel.
    pub async fn join(&self, invite_key: &[u8], initial: &M) -> Result<(), SessionError> {
        let plaintext = encode_json(initial)?;
        let (encoded, to_channel) = {
            let mut crypto = self.core.crypto.lock();
            let joiner = crypto
                .as_joiner_mut()
                .ok_or(SessionError::WrongRole("only the joiner can join"))?;
            let request = joiner.init_sender(invite_key, &plaintext)?;
            self.core.establish(&request.session_id, &request.to_session_id);
            (
                self.core.wire.encode_handshake_envelope(&request.envelope),
                address_of(&request.to_channel_id),
            )
        };
        let response = self.core.sender.send(&encoded, &to_channel).await?;
        debug!(status = response.status, "join posted");
        Ok(())
    }

    /// Seal and post `message`, handing the wire string to `record` after
    /// the request id is assigned and before it is posted.
    pub(crate) async fn send_recording<F>(&self, message: &M, record: F) -> Result<SendReceipt, SessionError>
    where
        F: FnOnce(u64, &str) + Send,
    {
        let _order = self.core.send_order.lock().await;
        let to = self.core.to_address()?;
        let wire = self.core.seal_message(message)?;
        let request_id = self.core.next_request_id.fetch_add(1, Ordering::Relaxed);
        record(request_id, &wire);
        match self.core.sender.send(&wire, &to).await {
            Ok(response) => Ok(SendReceipt { request_id, response }),
            Err(source) => {
                warn!(request_id, error = %source, "dispatch failed");
                Err(SessionError::Dispatch { request_id, source })
            }
        }
    }

    /// Post previously sealed wire strings again, in order.
    pub(crate) async fn redispatch(&self, wires: &[String]) -> Result<(), SessionError> {
        let _order = self.core.send_order.lock().await;
        let to = self.core.to_address()?;
        for wire in wires {
            self.core.sender.send(wire, &to).await?;
        }
        debug!(count = wires.len(), "resent from cache");
        Ok(())
    }
}

#[async_trait]
impl<M: Payload> Session<M> for EncryptedSession<M> {
    fn addresses(&self) -> Option<SessionAddresses> {
        self.core.addresses.lock().clone()
    }

    fn listen(&self) -> Result<SessionEventStream<M>, SessionError> {
        let session_id = self
            .core
            .addresses
            .lock()
            .as_ref()
            .map(|a| a.session_id.clone())
            .ok_or(SessionError::NotInitialized)?;
        let early = self.core.early.lock().take();
        let mut transport = match early {
            Some(stream) => stream,
            None => self.core.receiver.listen(&session_id),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let core = self.core.clone();
        tokio::spawn(async move {
            while let Some(event) = transport.recv().await {
                let out = match event {
                    TransportEvent::Open { ready_state } => SessionEvent::ChannelOpen { ready_state },
                    TransportEvent::Error { ready_state } => SessionEvent::ChannelError { ready_state },
                    TransportEvent::Data(data) => match core.open_message::<M>(&data) {
                        Ok(message) => SessionEvent::Message(message),
                        Err(err) => {
                            warn!(error = %err, "could not open message");
                            SessionEvent::OpenError
                        }
                    },
                };
                if tx.send(out).is_err() {
                    break;
                }
            }
            debug!("session stream ended");
        });
        Ok(rx)
    }

    async fn send(&self, message: &M) -> Result<SendReceipt, SessionError> {
        self.send_recording(message, |_, _| {}).await
    }

    async fn disconnect(&self) {
        self.core.early.lock().take();
        self.core.receiver.close().await;
        info!("session disconnected");
    }
}
