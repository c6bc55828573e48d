//! Chat: conversation policy on top of a session.
//!
//! Tracks message ids, piggybacks `lastSeenId` on every send, detects an
//! idle partner and keeps a quiet conversation alive with acks. What happens
//! when delivery goes wrong is left to a [`DeliveryPolicy`]:
//!
//! - [`BestEffort`]: nothing. Lost messages stay lost.
//! - [`Durable`]: resends unconfirmed ciphertexts until the partner's
//!   `lastSeenId` catches up, and flags a session that keeps failing.
//!
//! Timers are fire-and-forget tasks. Each captures a stamp when armed and
//! does nothing on wake-up if the stamp has moved on since.

pub mod durable;
pub mod events;

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Weak},
};

use async_trait::async_trait;
use edm_proto::{Message, MessageBody, MessageType};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use durable::Durable;
pub use events::ChatEvent;

use crate::{
    config::ChatConfig,
    error::{ChatError, SessionError},
    session::{Session, SessionAddresses, SessionCreator, SessionEvent, SessionWithReplay},
};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// What a delivery policy may do to the chat it is plugged into.
#[async_trait]
pub trait ChatLink<S: Send + Sync + 'static>: Send + Sync {
    fn session(&self) -> Option<Arc<S>>;

    /// Send an ack carrying the current `lastSeenId`. Failures are logged.
    async fn send_ack(&self);

    fn emit(&self, event: ChatEvent);
}

#[async_trait]
pub trait DeliveryPolicy<S: Send + Sync + 'static>: Send + Sync + 'static {
    /// Called once per send attempt that got a request id, whether or not
    /// the dispatch succeeded.
    fn on_dispatched(&self, _message: &Message, _request_id: u64) {}

    fn on_listen_start(&self) {}

    /// Called for every session event, before the chat handles it.
    async fn on_event(&self, link: &dyn ChatLink<S>, event: &SessionEvent<Message>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BestEffort;

#[async_trait]
impl<S: Session<Message> + 'static> DeliveryPolicy<S> for BestEffort {
    async fn on_event(&self, _link: &dyn ChatLink<S>, _event: &SessionEvent<Message>) {}
}

// ── Core ──────────────────────────────────────────────────────────────────────

struct ChatState {
    username: Option<String>,
    send_count: u64,
    last_seen_id: u64,
    partner_idle: bool,
    /// Bumped on every successful send.
    send_stamp: u64,
    /// Bumped on every received message.
    receive_stamp: u64,
}

struct ChatCore<C: SessionCreator<Message>, P> {
    creator: C,
    policy: P,
    config: ChatConfig,
    events: mpsc::UnboundedSender<ChatEvent>,
    session: Mutex<Option<Arc<C::Session>>>,
    state: Mutex<ChatState>,
    this: Weak<Self>,
}

impl<C, P> ChatCore<C, P>
where
    C: SessionCreator<Message>,
    P: DeliveryPolicy<C::Session>,
{
    fn publish(&self, event: ChatEvent) {
        if self.events.send(event).is_err() {
            debug!("chat event receiver dropped");
        }
    }

    fn current_session(&self) -> Option<Arc<C::Session>> {
        self.session.lock().clone()
    }

    fn display_name(&self, fallback: &str) -> String {
        self.state
            .lock()
            .username
            .clone()
            .unwrap_or_else(|| fallback.to_string())
    }

    async fn send_body(&self, body: MessageBody) -> Result<(), ChatError> {
        let session = self.current_session().ok_or(ChatError::NoSession)?;
        let message = {
            let mut state = self.state.lock();
            state.send_count += 1;
            Message::new(state.send_count, state.last_seen_id, body)
        };
        self.publish(ChatEvent::Queued { message: message.clone() });

        match session.send(&message).await {
            Ok(receipt) => {
                self.policy.on_dispatched(&message, receipt.request_id);
                let stamp = {
                    let mut state = self.state.lock();
                    state.send_stamp += 1;
                    state.send_stamp
                };
                self.publish(ChatEvent::Sent { message });
                self.arm_ack_poll(stamp);
            }
            Err(err) => {
                if let SessionError::Dispatch { request_id, .. } = &err {
                    self.policy.on_dispatched(&message, *request_id);
                }
                warn!(id = message.id, error = %err, "send failed");
                self.publish(ChatEvent::Failed { message });
            }
        }
        Ok(())
    }

    async fn send_ack_quietly(&self) {
        if let Err(err) = self.send_body(MessageBody::Ack).await {
            debug!(error = %err, "ack not sent");
        }
    }

    fn arm_ack_poll(&self, stamp: u64) {
        let this = self.this.clone();
        let delay = self.config.ack_poll_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(core) = this.upgrade() {
                core.poll_ack(stamp).await;
            }
        });
    }

    /// Keepalive: ack if nothing was sent since `stamp` and the partner is
    /// still around.
    fn poll_ack(self: Arc<Self>, stamp: u64) -> BoxFuture {
        Box::pin(async move {
            let due = {
                let state = self.state.lock();
                state.send_stamp == stamp && !state.partner_idle
            };
            if due {
                self.send_ack_quietly().await;
            }
        })
    }

    fn arm_idle_check(&self, stamp: u64) {
        let this = self.this.clone();
        let delay = self.config.idle_check_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(core) = this.upgrade() {
                core.check_idle(stamp);
            }
        });
    }

    fn check_idle(&self, stamp: u64) {
        let went_idle = {
            let mut state = self.state.lock();
            if state.receive_stamp == stamp && !state.partner_idle {
                state.partner_idle = true;
                true
            } else {
                false
            }
        };
        if went_idle {
            info!("partner idle");
            self.publish(ChatEvent::Idle);
        }
    }

    async fn handle_message(&self, message: Message) {
        let (became_active, stamp) = {
            let mut state = self.state.lock();
            state.last_seen_id = state.last_seen_id.max(message.id);
            state.receive_stamp += 1;
            let became_active = std::mem::replace(&mut state.partner_idle, false);
            (became_active, state.receive_stamp)
        };
        if became_active {
            self.publish(ChatEvent::Active);
        }

        let disconnect = message.kind() == MessageType::Disconnect;
        self.publish(ChatEvent::Message { message });

        if disconnect {
            let session = self.session.lock().take();
            if let Some(session) = session {
                session.disconnect().await;
            }
            info!("partner disconnected");
            self.publish(ChatEvent::Disconnected { local: false });
        }
        self.arm_idle_check(stamp);
    }

    async fn handle_session_event(&self, event: SessionEvent<Message>) {
        match &event {
            SessionEvent::ChannelOpen { ready_state } => {
                self.publish(ChatEvent::ChannelOpen { ready_state: *ready_state });
            }
            SessionEvent::ChannelError { ready_state } => {
                self.publish(ChatEvent::ChannelError { ready_state: *ready_state });
            }
            _ => {}
        }
        self.policy.on_event(self, &event).await;
        if let SessionEvent::Message(message) = event {
            self.handle_message(message).await;
        }
    }

    fn start_listening(&self, session: &Arc<C::Session>) -> Result<(), ChatError> {
        let mut events = session.listen()?;
        self.policy.on_listen_start();
        let this = self.this.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(core) = this.upgrade() else { break };
                core.handle_session_event(event).await;
            }
            debug!("chat listener stopped");
        });
        Ok(())
    }

    async fn init_session(&self, invite: String) -> Result<(), ChatError> {
        let events = self.events.clone();
        let on_event = move |event: &SessionEvent<Message>| {
            let forwarded = match event {
                SessionEvent::ChannelOpen { ready_state } => ChatEvent::ChannelOpen { ready_state: *ready_state },
                SessionEvent::ChannelError { ready_state } => ChatEvent::ChannelError { ready_state: *ready_state },
                _ => return,
            };
            let _ = events.send(forwarded);
        };
        let joined = self.creator.wait_for_join(&invite, Some(&on_event)).await?;

        let session = Arc::new(joined.session);
        *self.session.lock() = Some(session.clone());
        self.start_listening(&session)?;
        self.handle_message(joined.join_message).await;
        self.publish(ChatEvent::Initiated);

        let name = self.display_name(&self.config.initiator_name);
        self.send_body(MessageBody::Meta { name }).await
    }
}

#[async_trait]
impl<C, P> ChatLink<C::Session> for ChatCore<C, P>
where
    C: SessionCreator<Message>,
    P: DeliveryPolicy<C::Session>,
{
    fn session(&self) -> Option<Arc<C::Session>> {
        self.current_session()
    }

    async fn send_ack(&self) {
        self.send_ack_quietly().await;
    }

    fn emit(&self, event: ChatEvent) {
        self.publish(event);
    }
}

// ── Public handle ─────────────────────────────────────────────────────────────

/// One conversation. Cheap to clone; clones share state.
pub struct ChatContext<C: SessionCreator<Message>, P = BestEffort> {
    core: Arc<ChatCore<C, P>>,
}

/// Chat that recovers from lost messages by resending cached ciphertexts.
pub type DurableChatContext<C> = ChatContext<C, Durable>;

impl<C: SessionCreator<Message>, P> Clone for ChatContext<C, P> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<C: SessionCreator<Message>> ChatContext<C, BestEffort> {
    pub fn new(creator: C, config: ChatConfig) -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        Self::with_policy(creator, BestEffort, config)
    }
}

impl<C> ChatContext<C, Durable>
where
    C: SessionCreator<Message>,
    C::Session: SessionWithReplay<Message>,
{
    pub fn durable(creator: C, config: ChatConfig) -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let policy = Durable::new(config.dead_session_threshold);
        Self::with_policy(creator, policy, config)
    }

    pub fn policy(&self) -> &Durable {
        &self.core.policy
    }
}

impl<C, P> ChatContext<C, P>
where
    C: SessionCreator<Message>,
    P: DeliveryPolicy<C::Session>,
{
    pub fn with_policy(
        creator: C,
        policy: P,
        config: ChatConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let core = Arc::new_cyclic(|this| ChatCore {
            creator,
            policy,
            config,
            events: tx,
            session: Mutex::new(None),
            state: Mutex::new(ChatState {
                username: None,
                send_count: 0,
                last_seen_id: 0,
                partner_idle: true,
                send_stamp: 0,
                receive_stamp: 0,
            }),
            this: this.clone(),
        });
        (Self { core }, rx)
    }

    /// Create an invite and wait for a joiner in the background. Returns
    /// the invite right away; `Initiated` follows once someone joins.
    pub fn create_invite_and_wait(&self) -> String {
        let invite = self.core.creator.create_invite();
        self.core.publish(ChatEvent::Invite { invite: invite.clone() });
        let core = self.core.clone();
        let pending = invite.clone();
        tokio::spawn(async move {
            if let Err(err) = core.init_session(pending).await {
                warn!(error = %err, "waiting for join failed");
            }
        });
        invite
    }

    /// Join `invite`, announcing the current username (or the anonymous
    /// default). Does nothing if a session already exists.
    pub async fn join_with_invite(&self, invite: &str) -> Result<(), ChatError> {
        if self.core.current_session().is_some() {
            return Ok(());
        }
        let name = self.core.display_name(&self.core.config.joiner_name);
        let join_message = Message::new(0, 0, MessageBody::Meta { name });
        let session = Arc::new(self.core.creator.join_with_invite(invite, &join_message).await?);
        *self.core.session.lock() = Some(session.clone());
        self.core.start_listening(&session)?;
        self.core.publish(ChatEvent::Initiated);
        Ok(())
    }

    pub async fn set_username(&self, name: impl Into<String>) -> Result<(), ChatError> {
        let name = name.into();
        self.core.state.lock().username = Some(name.clone());
        if self.core.current_session().is_some() {
            self.core.send_body(MessageBody::Meta { name }).await?;
        }
        Ok(())
    }

    pub async fn send(&self, text: impl Into<String>) -> Result<(), ChatError> {
        self.core
            .send_body(MessageBody::Message { msg: text.into() })
            .await
    }

    pub async fn ping(&self) -> Result<(), ChatError> {
        self.core.send_body(MessageBody::Ack).await
    }

    /// Tell the partner, then close the session. No-op without a session.
    pub async fn disconnect(&self) -> Result<(), ChatError> {
        if self.core.current_session().is_none() {
            return Ok(());
        }
        self.core.send_body(MessageBody::Disconnect).await?;
        let session = self.core.session.lock().take();
        if let Some(session) = session {
            session.disconnect().await;
            self.core.publish(ChatEvent::Disconnected { local: true });
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.core.current_session().is_some()
    }

    pub fn addresses(&self) -> Option<SessionAddresses> {
        self.core.current_session().and_then(|session| session.addresses())
    }

    pub fn username(&self) -> Option<String> {
        self.core.state.lock().username.clone()
    }

    pub fn is_partner_idle(&self) -> bool {
        self.core.state.lock().partner_idle
    }

    pub fn last_seen_id(&self) -> u64 {
        self.core.state.lock().last_seen_id
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc::UnboundedSender;

    use super::*;
    use crate::{
        session::{Joined, SendReceipt, SessionEventStream},
        transport::SendResponse,
    };

    struct ScriptedSession {
        inbox: Mutex<Option<SessionEventStream<Message>>>,
    }

    #[async_trait]
    impl Session<Message> for ScriptedSession {
        fn addresses(&self) -> Option<SessionAddresses> {
            None
        }

        fn listen(&self) -> Result<SessionEventStream<Message>, SessionError> {
            self.inbox.lock().take().ok_or(SessionError::NotConnected)
        }

        async fn send(&self, _message: &Message) -> Result<SendReceipt, SessionError> {
            Ok(SendReceipt {
                request_id: 0,
                response: SendResponse {
                    ok: true,
                    status: 200,
                    status_text: "OK".into(),
                },
            })
        }

        async fn disconnect(&self) {}
    }

    /// Hands out one session whose inbound events the test feeds directly.
    struct ScriptedCreator {
        inbox: Mutex<Option<SessionEventStream<Message>>>,
    }

    #[async_trait]
    impl SessionCreator<Message> for ScriptedCreator {
        type Session = ScriptedSession;

        fn create_invite(&self) -> String {
            "scripted".into()
        }

        async fn wait_for_join(
            &self,
            _invite: &str,
            _on_event: Option<crate::session::EventCallback<'_, Message>>,
        ) -> Result<Joined<ScriptedSession, Message>, SessionError> {
            Err(SessionError::InviteNotFound)
        }

        async fn join_with_invite(&self, _invite: &str, _join: &Message) -> Result<ScriptedSession, SessionError> {
            Ok(ScriptedSession {
                inbox: Mutex::new(self.inbox.lock().take()),
            })
        }
    }

    type Inbound = UnboundedSender<SessionEvent<Message>>;

    async fn joined_chat() -> (ChatContext<ScriptedCreator>, mpsc::UnboundedReceiver<ChatEvent>, Inbound) {
        let (tx, rx) = mpsc::unbounded_channel();
        let creator = ScriptedCreator {
            inbox: Mutex::new(Some(rx)),
        };
        let (chat, events) = ChatContext::new(creator, ChatConfig::default());
        chat.join_with_invite("scripted").await.unwrap();
        (chat, events, tx)
    }

    fn text(id: u64) -> SessionEvent<Message> {
        SessionEvent::Message(Message::new(id, 0, MessageBody::Message { msg: format!("m{id}") }))
    }

    async fn next_message(events: &mut mpsc::UnboundedReceiver<ChatEvent>) -> Message {
        loop {
            match events.recv().await {
                Some(ChatEvent::Message { message }) => return message,
                Some(_) => continue,
                None => panic!("event stream closed"),
            }
        }
    }

    /// Every event up to and including the next `Message`.
    async fn until_message(events: &mut mpsc::UnboundedReceiver<ChatEvent>) -> Vec<ChatEvent> {
        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            let done = matches!(event, ChatEvent::Message { .. });
            seen.push(event);
            if done {
                break;
            }
        }
        seen
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<ChatEvent>) -> Vec<ChatEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        seen
    }

    fn count(seen: &[ChatEvent], wanted: &ChatEvent) -> usize {
        seen.iter().filter(|e| *e == wanted).count()
    }

    #[tokio::test]
    async fn last_seen_id_keeps_the_maximum() {
        let (chat, mut events, inbound) = joined_chat().await;

        for id in [3, 1, 2, 3] {
            inbound.send(text(id)).unwrap();
            assert_eq!(next_message(&mut events).await.id, id);
            assert_eq!(chat.last_seen_id(), 3);
        }
        inbound.send(text(5)).unwrap();
        next_message(&mut events).await;
        assert_eq!(chat.last_seen_id(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_and_active_fire_once_per_transition() {
        let (chat, mut events, inbound) = joined_chat().await;

        inbound.send(text(1)).unwrap();
        next_message(&mut events).await;
        inbound.send(text(2)).unwrap();
        next_message(&mut events).await;
        tokio::time::sleep(Duration::from_secs(200)).await;

        let seen = drain(&mut events);
        assert_eq!(count(&seen, &ChatEvent::Idle), 1);
        assert!(chat.is_partner_idle());

        let mut seen = Vec::new();
        for id in 3..=5 {
            inbound.send(text(id)).unwrap();
            seen.extend(until_message(&mut events).await);
        }
        // Only the first message after the idle period wakes the partner.
        assert_eq!(count(&seen, &ChatEvent::Active), 1);
        assert!(!chat.is_partner_idle());

        tokio::time::sleep(Duration::from_secs(200)).await;
        let seen = drain(&mut events);
        assert_eq!(count(&seen, &ChatEvent::Idle), 1);
        assert_eq!(count(&seen, &ChatEvent::Active), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn active_is_emitted_before_the_waking_message() {
        let (_chat, mut events, inbound) = joined_chat().await;
        drain(&mut events);

        inbound.send(text(1)).unwrap();
        assert_eq!(events.recv().await, Some(ChatEvent::Active));
        assert!(matches!(events.recv().await, Some(ChatEvent::Message { .. })));

        inbound.send(text(2)).unwrap();
        assert!(matches!(events.recv().await, Some(ChatEvent::Message { .. })));
    }
}
