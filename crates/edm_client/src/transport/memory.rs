//! In-process relay.
//!
//! Same semantics as the HTTP relay (fan-out to live subscribers, no
//! buffering) without any I/O, plus fault injection so delivery failures can
//! be reproduced deterministically.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    ReadyState, ReceiverTransport, SendResponse, SenderTransport, TransportCreator, TransportEvent,
    TransportStream,
};
use crate::error::TransportError;

#[derive(Default)]
struct RelayState {
    next_subscriber: u64,
    subscribers: HashMap<String, Vec<(u64, mpsc::UnboundedSender<TransportEvent>)>>,
    /// Per-address count of posts to accept and silently discard.
    drops: HashMap<String, usize>,
    /// Count of upcoming sends (any address) that fail outright.
    failures: usize,
    delivered: u64,
}

#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribe(&self, address: &str) -> (u64, TransportStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        // Receiver is alive, so this cannot fail.
        let _ = tx.send(TransportEvent::Open { ready_state: ReadyState::Open });
        let mut state = self.state.lock();
        state.next_subscriber += 1;
        let id = state.next_subscriber;
        state
            .subscribers
            .entry(address.to_string())
            .or_default()
            .push((id, tx));
        (id, rx)
    }

    fn unsubscribe(&self, address: &str, id: u64) {
        let mut state = self.state.lock();
        if let Some(subs) = state.subscribers.get_mut(address) {
            subs.retain(|(sub, _)| *sub != id);
            if subs.is_empty() {
                state.subscribers.remove(address);
            }
        }
    }

    fn publish(&self, body: &str, address: &str) -> Result<SendResponse, TransportError> {
        let mut state = self.state.lock();
        if state.failures > 0 {
            state.failures -= 1;
            return Err(TransportError::Unavailable("injected send failure".into()));
        }
        if let Some(n) = state.drops.get_mut(address) {
            if *n > 0 {
                *n -= 1;
                debug!(address, "dropping post");
                return Ok(accepted());
            }
        }
        let mut delivered = 0;
        if let Some(subs) = state.subscribers.get_mut(address) {
            subs.retain(|(_, tx)| tx.send(TransportEvent::Data(body.to_string())).is_ok());
            delivered = subs.len() as u64;
        }
        state.delivered += delivered;
        Ok(accepted())
    }

    /// Accept and discard the next `n` posts to `address`.
    pub fn drop_next(&self, address: &str, n: usize) {
        *self.state.lock().drops.entry(address.to_string()).or_default() += n;
    }

    /// Cancel any pending drops on `address`.
    pub fn resume(&self, address: &str) {
        self.state.lock().drops.remove(address);
    }

    /// Fail the next `n` sends to any address with a transport error.
    pub fn fail_next_sends(&self, n: usize) {
        self.state.lock().failures += n;
    }

    /// Simulate a dropped and re-established connection on every stream
    /// listening to `address`.
    pub fn interrupt(&self, address: &str) {
        let state = self.state.lock();
        if let Some(subs) = state.subscribers.get(address) {
            for (_, tx) in subs {
                let _ = tx.send(TransportEvent::Error { ready_state: ReadyState::Connecting });
                let _ = tx.send(TransportEvent::Open { ready_state: ReadyState::Open });
            }
        }
    }

    /// Streams currently open on `address`.
    pub fn subscriber_count(&self, address: &str) -> usize {
        self.state
            .lock()
            .subscribers
            .get(address)
            .map(|subs| subs.iter().filter(|(_, tx)| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Total number of bodies handed to subscribers.
    pub fn delivered(&self) -> u64 {
        self.state.lock().delivered
    }

    pub fn receiver(&self) -> MemoryReceiver {
        MemoryReceiver {
            relay: self.clone(),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn sender(&self) -> MemorySender {
        MemorySender { relay: self.clone() }
    }
}

fn accepted() -> SendResponse {
    SendResponse {
        ok: true,
        status: 200,
        status_text: "OK".to_string(),
    }
}

pub struct MemoryReceiver {
    relay: MemoryRelay,
    subscriptions: Mutex<Vec<(String, u64)>>,
}

#[async_trait]
impl ReceiverTransport for MemoryReceiver {
    fn listen(&self, address: &str) -> TransportStream {
        let (id, stream) = self.relay.subscribe(address);
        self.subscriptions.lock().push((address.to_string(), id));
        stream
    }

    fn unlisten(&self, address: &str) {
        let ended: Vec<u64> = {
            let mut subscriptions = self.subscriptions.lock();
            let (ended, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut *subscriptions)
                .into_iter()
                .partition(|(addr, _)| addr == address);
            *subscriptions = kept;
            ended.into_iter().map(|(_, id)| id).collect()
        };
        for id in ended {
            self.relay.unsubscribe(address, id);
        }
    }

    async fn close(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for (address, id) in subscriptions {
            self.relay.unsubscribe(&address, id);
        }
    }
}

pub struct MemorySender {
    relay: MemoryRelay,
}

#[async_trait]
impl SenderTransport for MemorySender {
    async fn send(&self, body: &str, address: &str) -> Result<SendResponse, TransportError> {
        self.relay.publish(body, address)
    }
}

impl TransportCreator for MemoryRelay {
    fn create_receiver(&self) -> Box<dyn ReceiverTransport> {
        Box::new(self.receiver())
    }

    fn create_sender(&self) -> Box<dyn SenderTransport> {
        Box::new(self.sender())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_to_live_subscribers_only() {
        let relay = MemoryRelay::new();
        let sender = relay.sender();

        sender.send("early", "a").await.unwrap();

        let rx1 = relay.receiver();
        let rx2 = relay.receiver();
        let mut s1 = rx1.listen("a");
        let mut s2 = rx2.listen("a");
        assert_eq!(s1.recv().await, Some(TransportEvent::Open { ready_state: ReadyState::Open }));
        assert_eq!(s2.recv().await, Some(TransportEvent::Open { ready_state: ReadyState::Open }));

        sender.send("hello", "a").await.unwrap();
        sender.send("elsewhere", "b").await.unwrap();
        assert_eq!(s1.recv().await, Some(TransportEvent::Data("hello".into())));
        assert_eq!(s2.recv().await, Some(TransportEvent::Data("hello".into())));
        assert!(s1.try_recv().is_err());
    }

    #[tokio::test]
    async fn unlisten_ends_only_that_address() {
        let relay = MemoryRelay::new();
        let rx = relay.receiver();
        let mut a = rx.listen("a");
        let _b = rx.listen("b");
        a.recv().await.unwrap();

        rx.unlisten("a");
        assert_eq!(a.recv().await, None);
        assert_eq!(relay.subscriber_count("a"), 0);
        assert_eq!(relay.subscriber_count("b"), 1);
    }

    #[tokio::test]
    async fn close_ends_streams() {
        let relay = MemoryRelay::new();
        let rx = relay.receiver();
        let mut stream = rx.listen("a");
        stream.recv().await.unwrap();
        assert_eq!(relay.subscriber_count("a"), 1);

        rx.close().await;
        assert_eq!(stream.recv().await, None);
        assert_eq!(relay.subscriber_count("a"), 0);
    }

    #[tokio::test]
    async fn drop_next_discards_silently() {
        let relay = MemoryRelay::new();
        let rx = relay.receiver();
        let mut stream = rx.listen("a");
        stream.recv().await.unwrap();

        relay.drop_next("a", 1);
        let res = relay.sender().send("lost", "a").await.unwrap();
        assert!(res.ok);
        relay.sender().send("kept", "a").await.unwrap();
        assert_eq!(stream.recv().await, Some(TransportEvent::Data("kept".into())));
    }

    #[tokio::test]
    async fn interrupt_reports_error_then_open() {
        let relay = MemoryRelay::new();
        let rx = relay.receiver();
        let mut stream = rx.listen("a");
        stream.recv().await.unwrap();

        relay.interrupt("a");
        assert_eq!(
            stream.recv().await,
            Some(TransportEvent::Error { ready_state: ReadyState::Connecting })
        );
        assert_eq!(stream.recv().await, Some(TransportEvent::Open { ready_state: ReadyState::Open }));
    }

    #[tokio::test]
    async fn injected_failures_error() {
        let relay = MemoryRelay::new();
        relay.fail_next_sends(1);
        assert!(relay.sender().send("x", "a").await.is_err());
        assert!(relay.sender().send("x", "a").await.is_ok());
    }
}
