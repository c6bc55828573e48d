use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use edm_client::{
    ChatConfig, ChatContext, ChatError, ChatEvent, DurableChatContext, HttpTransportCreator,
    RelayConfig, ReplaySessionCreator,
};
use edm_proto::{identity::fingerprint, DidKeyIdentity, Identity, Message, MessageBody};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;
use tracing_subscriber::EnvFilter;

type Chat = DurableChatContext<ReplaySessionCreator<Message>>;

#[derive(Parser, Debug)]
#[command(author, version, about = "5EDM anonymous end-to-end encrypted chat", long_about = None)]
struct Cli {
    /// Relay base URL (defaults to $EDM_RELAY_URL, then localhost)
    #[arg(long)]
    relay: Option<String>,
    /// Display name announced to the partner
    #[arg(long)]
    name: Option<String>,
    /// Undecryptable messages in a row before the session is reported dead
    #[arg(long)]
    dead_session_threshold: Option<u32>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an invite and wait for someone to join
    Invite,
    /// Join a conversation from an invite
    Join { invite: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edm_chat=info,edm_client=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut relay = RelayConfig::from_env();
    if let Some(url) = cli.relay {
        relay.base_url = url.trim_end_matches('/').to_string();
    }
    let mut config = ChatConfig::default();
    if let Some(threshold) = cli.dead_session_threshold {
        config.dead_session_threshold = threshold;
    }
    info!(relay = %relay.base_url, "starting");

    let transports = HttpTransportCreator::new(relay)?;
    let (chat, events): (Chat, _) =
        ChatContext::durable(ReplaySessionCreator::new(Arc::new(transports)), config);
    if let Some(name) = cli.name {
        chat.set_username(name).await?;
    }

    let mut printer = tokio::spawn(print_events(events));
    match cli.command {
        Commands::Invite => {
            chat.create_invite_and_wait();
        }
        Commands::Join { invite } => {
            let invite = invite.trim();
            if let Some(fp) = invite_fingerprint(invite) {
                println!("* joining invite {fp}");
            }
            chat.join_with_invite(invite).await?
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = &mut printer => return Ok(()),
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&chat, line.trim()).await? {
                    break;
                }
            }
        }
    }

    chat.disconnect().await?;
    printer.abort();
    Ok(())
}

/// Short code both sides can read aloud to confirm they hold the same invite.
fn invite_fingerprint(invite: &str) -> Option<String> {
    DidKeyIdentity.decode(invite).ok().map(|key| fingerprint(&key))
}

/// Returns `false` when the user asked to leave.
async fn handle_line(chat: &Chat, line: &str) -> Result<bool> {
    let result = match line {
        "" => Ok(()),
        "/quit" => return Ok(false),
        "/ping" => chat.ping().await,
        _ if line.starts_with("/name ") => chat.set_username(line["/name ".len()..].trim()).await,
        text => chat.send(text).await,
    };
    match result {
        Ok(()) => Ok(true),
        Err(ChatError::NoSession) => {
            println!("* not connected yet");
            Ok(true)
        }
        Err(err) => Err(err.into()),
    }
}

/// Prints chat events until the partner leaves.
async fn print_events(mut events: UnboundedReceiver<ChatEvent>) {
    let mut partner = String::from("partner");
    while let Some(event) = events.recv().await {
        match event {
            ChatEvent::Invite { invite } => {
                println!("* share this invite:\n{invite}");
                if let Some(fp) = invite_fingerprint(&invite) {
                    println!("* fingerprint {fp}");
                }
            }
            ChatEvent::Initiated => println!("* connected"),
            ChatEvent::ChannelError { ready_state } => {
                println!("* relay connection lost ({ready_state:?}), reconnecting")
            }
            ChatEvent::Message { message } => match message.body {
                MessageBody::Message { msg } => println!("<{partner}> {msg}"),
                MessageBody::Meta { name } => {
                    println!("* partner is now known as {name}");
                    partner = name;
                }
                MessageBody::Ack | MessageBody::Disconnect => {}
            },
            ChatEvent::Failed { message } => println!("* message {} failed to send", message.id),
            ChatEvent::Idle => println!("* {partner} went quiet"),
            ChatEvent::Active => println!("* {partner} is here"),
            ChatEvent::DeadSession { open_errors } => {
                println!("* {open_errors} messages could not be decrypted; the session may be broken")
            }
            ChatEvent::Disconnected { local: false } => {
                println!("* {partner} left");
                return;
            }
            ChatEvent::Disconnected { local: true } => println!("* disconnected"),
            ChatEvent::ChannelOpen { .. } | ChatEvent::Queued { .. } | ChatEvent::Sent { .. } => {}
        }
    }
}
