//! Replay-capable session.
//!
//! Wraps an [`EncryptedSession`] and keeps the exact wire string of every
//! send attempt, keyed by request id, until told to forget it. Resending
//! posts the cached ciphertext byte-for-byte; it never seals again, so the
//! receiver's sequence numbers line up with what it missed.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    EncryptedSession, Payload, SendReceipt, Session, SessionAddresses, SessionEventStream,
    SessionWithReplay,
};
use crate::error::SessionError;

pub struct ReplaySession<M> {
    inner: EncryptedSession<M>,
    cache: Mutex<HashMap<u64, String>>,
}

impl<M: Payload> ReplaySession<M> {
    pub fn new(inner: EncryptedSession<M>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &EncryptedSession<M> {
        &self.inner
    }

    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }
}

#[async_trait]
impl<M: Payload> Session<M> for ReplaySession<M> {
    fn addresses(&self) -> Option<SessionAddresses> {
        self.inner.addresses()
    }

    fn listen(&self) -> Result<SessionEventStream<M>, SessionError> {
        self.inner.listen()
    }

    /// The wire string is cached before it is posted, so a failed dispatch
    /// can still be resent later.
    async fn send(&self, message: &M) -> Result<SendReceipt, SessionError> {
        let cache = &self.cache;
        self.inner
            .send_recording(message, |request_id, wire| {
                cache.lock().insert(request_id, wire.to_string());
            })
            .await
    }

    async fn disconnect(&self) {
        self.inner.disconnect().await;
    }
}

#[async_trait]
impl<M: Payload> SessionWithReplay<M> for ReplaySession<M> {
    fn clear_cache(&self, request_ids: &[u64]) {
        let mut cache = self.cache.lock();
        for id in request_ids {
            cache.remove(id);
        }
    }

    async fn resend_from_cache(&self, request_ids: &[u64]) -> Result<(), SessionError> {
        let wires: Vec<String> = {
            let cache = self.cache.lock();
            request_ids
                .iter()
                .filter_map(|id| cache.get(id).cloned())
                .collect()
        };
        if wires.is_empty() {
            return Ok(());
        }
        self.inner.redispatch(&wires).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionEvent;
    use crate::transport::{memory::MemoryRelay, TransportCreator};
    use edm_crypto::{InitiatorContext, JoinerContext};
    use serde_json::{json, Value};

    async fn pair(relay: &MemoryRelay) -> (ReplaySession<Value>, ReplaySession<Value>) {
        let ctx = InitiatorContext::init();
        let pk = ctx.public_key();
        let initiator =
            EncryptedSession::new(ctx.into(), relay.create_receiver(), relay.create_sender());
        let mut events = initiator.wait_for_join().unwrap();
        let joiner = EncryptedSession::new(
            JoinerContext::new().into(),
            relay.create_receiver(),
            relay.create_sender(),
        );
        joiner.join(&pk, &json!("join")).await.unwrap();
        while !matches!(events.recv().await, Some(SessionEvent::Handshake(_))) {}
        (ReplaySession::new(initiator), ReplaySession::new(joiner))
    }

    async fn next_message(events: &mut SessionEventStream<Value>) -> SessionEvent<Value> {
        loop {
            match events.recv().await {
                Some(SessionEvent::ChannelOpen { .. }) => continue,
                Some(other) => return other,
                None => panic!("stream ended"),
            }
        }
    }

    #[tokio::test]
    async fn resend_recovers_a_lost_message() {
        let relay = MemoryRelay::new();
        let (initiator, joiner) = pair(&relay).await;
        let mut inbox = initiator.listen().unwrap();
        let to = joiner.addresses().unwrap().to_session_id;

        relay.drop_next(&to, 1);
        let lost = joiner.send(&json!(1)).await.unwrap();
        let kept = joiner.send(&json!(2)).await.unwrap();
        assert_eq!(joiner.cached_count(), 2);

        // Second message is out of order for the receiver.
        assert_eq!(next_message(&mut inbox).await, SessionEvent::OpenError);

        joiner
            .resend_from_cache(&[lost.request_id, kept.request_id])
            .await
            .unwrap();
        assert_eq!(next_message(&mut inbox).await, SessionEvent::Message(json!(1)));
        assert_eq!(next_message(&mut inbox).await, SessionEvent::Message(json!(2)));
    }

    #[tokio::test]
    async fn failed_dispatch_is_still_cached() {
        let relay = MemoryRelay::new();
        let (_initiator, joiner) = pair(&relay).await;

        relay.fail_next_sends(1);
        let err = joiner.send(&json!("x")).await.unwrap_err();
        let request_id = match err {
            SessionError::Dispatch { request_id, .. } => request_id,
            other => panic!("unexpected error: {other}"),
        };
        assert_eq!(joiner.cached_count(), 1);
        joiner.resend_from_cache(&[request_id]).await.unwrap();

        joiner.clear_cache(&[request_id]);
        assert_eq!(joiner.cached_count(), 0);
    }

    #[tokio::test]
    async fn unknown_ids_are_skipped() {
        let relay = MemoryRelay::new();
        let (_initiator, joiner) = pair(&relay).await;
        let before = relay.delivered();
        joiner.resend_from_cache(&[42, 43]).await.unwrap();
        assert_eq!(relay.delivered(), before);
    }
}
