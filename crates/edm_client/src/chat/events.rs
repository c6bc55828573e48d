//! Events a chat front-end renders.

use edm_proto::Message;
use serde::Serialize;

use crate::transport::ReadyState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    ChannelOpen { ready_state: ReadyState },
    ChannelError { ready_state: ReadyState },
    /// An invite was created and is waiting for a joiner.
    Invite { invite: String },
    /// Both sides are connected.
    Initiated,
    Message { message: Message },
    Queued { message: Message },
    Sent { message: Message },
    Failed { message: Message },
    /// Nothing received from the partner for a while.
    Idle,
    /// The partner is sending again after being idle.
    Active,
    Disconnected { local: bool },
    /// Advisory: this many consecutive messages failed to open.
    DeadSession { open_errors: u32 },
}

impl ChatEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ChannelOpen { .. } => "channel_open",
            Self::ChannelError { .. } => "channel_error",
            Self::Invite { .. } => "invite",
            Self::Initiated => "initiated",
            Self::Message { .. } => "message",
            Self::Queued { .. } => "queued",
            Self::Sent { .. } => "sent",
            Self::Failed { .. } => "failed",
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Disconnected { .. } => "disconnected",
            Self::DeadSession { .. } => "dead_session",
        }
    }
}
