//! Durable delivery: resend what the partner has not confirmed.
//!
//! Every message carries the sender's `lastSeenId`. Anything we sent with a
//! higher id is unconfirmed and its ciphertext stays in the session's replay
//! cache. When the partner reports a `lastSeenId` below our last sent id, the
//! unconfirmed ciphertexts go out again, unchanged and in seal order, so the
//! partner's receive sequence can catch up.
//!
//! An open error on our side means we missed something. We ack once so the
//! partner learns our `lastSeenId`, then stay quiet until it catches up.

use std::collections::BTreeMap;

use async_trait::async_trait;
use edm_proto::Message;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{ChatEvent, ChatLink, DeliveryPolicy};
use crate::session::{SessionEvent, SessionWithReplay};

#[derive(Debug, Default)]
struct DurableState {
    last_sent_id: u64,
    last_clear_id: u64,
    partner_last_seen_id: u64,
    /// Set while we are failing to open the partner's messages.
    out_of_sync: bool,
    /// Partner's `lastSeenId` when we went out of sync.
    last_id_in_sync: u64,
    open_errors: u32,
    channel_errored: bool,
    /// Message id -> request id of its latest send attempt.
    unconfirmed: BTreeMap<u64, u64>,
}

#[derive(Debug)]
pub struct Durable {
    threshold: u32,
    state: Mutex<DurableState>,
}

impl Durable {
    /// `threshold`: consecutive open errors after which the session is
    /// reported dead.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            state: Mutex::new(DurableState::default()),
        }
    }

    /// Message ids the partner has not confirmed yet, ascending.
    pub fn unconfirmed(&self) -> Vec<u64> {
        self.state.lock().unconfirmed.keys().copied().collect()
    }

    pub fn partner_last_seen_id(&self) -> u64 {
        self.state.lock().partner_last_seen_id
    }

    pub fn is_out_of_sync(&self) -> bool {
        self.state.lock().out_of_sync
    }

    async fn on_message<S>(&self, link: &dyn ChatLink<S>, message: &Message)
    where
        S: SessionWithReplay<Message> + 'static,
    {
        let (partner, cleared, mut resend) = {
            let mut state = self.state.lock();
            state.open_errors = 0;
            state.partner_last_seen_id = state.partner_last_seen_id.max(message.last_seen_id);
            let partner = state.partner_last_seen_id;

            let mut cleared = Vec::new();
            if partner > state.last_clear_id {
                let pending = state.unconfirmed.split_off(&partner.saturating_add(1));
                cleared = std::mem::replace(&mut state.unconfirmed, pending)
                    .into_values()
                    .collect();
                state.last_clear_id = partner;
            }

            let resend: Vec<u64> = if !state.out_of_sync && partner < state.last_sent_id {
                state.unconfirmed.values().copied().collect()
            } else {
                Vec::new()
            };

            if state.out_of_sync && partner >= state.last_id_in_sync {
                debug!(partner_last_seen = partner, "back in sync");
                state.out_of_sync = false;
            }
            (partner, cleared, resend)
        };

        let Some(session) = link.session() else { return };
        if !cleared.is_empty() {
            session.clear_cache(&cleared);
        }
        if !resend.is_empty() {
            // Request ids follow seal order.
            resend.sort_unstable();
            debug!(count = resend.len(), partner_last_seen = partner, "resending unconfirmed");
            if let Err(err) = session.resend_from_cache(&resend).await {
                warn!(error = %err, "resend failed");
            }
        }
    }

    async fn on_open_error<S>(&self, link: &dyn ChatLink<S>)
    where
        S: SessionWithReplay<Message> + 'static,
    {
        let (ack, dead) = {
            let mut state = self.state.lock();
            state.last_id_in_sync = state.partner_last_seen_id;
            state.open_errors += 1;
            let ack = !state.out_of_sync;
            state.out_of_sync = true;
            let dead = (state.open_errors == self.threshold).then_some(state.open_errors);
            (ack, dead)
        };
        if ack {
            link.send_ack().await;
        }
        if let Some(open_errors) = dead {
            warn!(open_errors, "session looks unrecoverable");
            link.emit(ChatEvent::DeadSession { open_errors });
        }
    }
}

#[async_trait]
impl<S> DeliveryPolicy<S> for Durable
where
    S: SessionWithReplay<Message> + 'static,
{
    fn on_dispatched(&self, message: &Message, request_id: u64) {
        let mut state = self.state.lock();
        state.unconfirmed.insert(message.id, request_id);
        state.last_sent_id = state.last_sent_id.max(message.id);
    }

    fn on_listen_start(&self) {
        let mut state = self.state.lock();
        state.open_errors = 0;
        state.channel_errored = false;
        state.out_of_sync = false;
        state.last_id_in_sync = state.partner_last_seen_id;
    }

    async fn on_event(&self, link: &dyn ChatLink<S>, event: &SessionEvent<Message>) {
        match event {
            SessionEvent::Message(message) => self.on_message(link, message).await,
            SessionEvent::OpenError => self.on_open_error(link).await,
            SessionEvent::ChannelError { .. } => {
                self.state.lock().channel_errored = true;
            }
            SessionEvent::ChannelOpen { .. } => {
                let recovering = std::mem::take(&mut self.state.lock().channel_errored);
                if recovering {
                    debug!("channel reopened, acking");
                    link.send_ack().await;
                }
            }
            SessionEvent::Handshake(_) => {}
        }
    }
}
