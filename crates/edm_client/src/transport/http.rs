//! HTTP relay binding.
//!
//! Receive: one long-lived `GET {subscribe_url}` per address, read as
//! server-sent events. When the stream fails or ends the task reports
//! `Error`, waits `reconnect_delay` and reconnects, reporting `Open` again.
//!
//! Send: `POST {send_url}` with the wire string as the body. Connection
//! failures are retried with exponential backoff up to `max_send_attempts`;
//! an HTTP error status is a response, not a failure, and is returned as is.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::ACCEPT;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use super::{
    sse::SseDecoder, ReadyState, ReceiverTransport, SendResponse, SenderTransport,
    TransportCreator, TransportEvent, TransportStream,
};
use crate::{config::RelayConfig, error::TransportError};

#[derive(Clone)]
pub struct HttpTransportCreator {
    client: reqwest::Client,
    config: Arc<RelayConfig>,
}

impl HttpTransportCreator {
    pub fn new(config: RelayConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("edm-client/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }
}

impl TransportCreator for HttpTransportCreator {
    fn create_receiver(&self) -> Box<dyn ReceiverTransport> {
        Box::new(SseReceiver {
            client: self.client.clone(),
            config: self.config.clone(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    fn create_sender(&self) -> Box<dyn SenderTransport> {
        Box::new(HttpSender {
            client: self.client.clone(),
            config: self.config.clone(),
        })
    }
}

// ── Receive ───────────────────────────────────────────────────────────────────

pub struct SseReceiver {
    client: reqwest::Client,
    config: Arc<RelayConfig>,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
}

#[async_trait]
impl ReceiverTransport for SseReceiver {
    /// Must be called from within a tokio runtime.
    fn listen(&self, address: &str) -> TransportStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_sse_loop(
            self.client.clone(),
            self.config.clone(),
            address.to_string(),
            tx,
        );
        self.tasks.lock().push((address.to_string(), handle));
        rx
    }

    fn unlisten(&self, address: &str) {
        self.tasks.lock().retain(|(addr, handle)| {
            if addr == address {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    async fn close(&self) {
        for (_, handle) in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

fn spawn_sse_loop(
    client: reqwest::Client,
    config: Arc<RelayConfig>,
    address: String,
    tx: mpsc::UnboundedSender<TransportEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let url = config.subscribe_url(&address);
        loop {
            match client.get(&url).header(ACCEPT, "text/event-stream").send().await {
                Ok(mut resp) if resp.status().is_success() => {
                    info!(%address, "event stream open");
                    if tx.send(TransportEvent::Open { ready_state: ReadyState::Open }).is_err() {
                        return;
                    }
                    let mut decoder = SseDecoder::new();
                    loop {
                        match resp.chunk().await {
                            Ok(Some(chunk)) => {
                                for data in decoder.push(&chunk) {
                                    if tx.send(TransportEvent::Data(data)).is_err() {
                                        return;
                                    }
                                }
                            }
                            Ok(None) => {
                                debug!(%address, "event stream ended");
                                break;
                            }
                            Err(err) => {
                                warn!(%address, error = %err, "event stream failed");
                                break;
                            }
                        }
                    }
                }
                Ok(resp) => warn!(%address, status = %resp.status(), "subscribe rejected"),
                Err(err) => warn!(%address, error = %err, "subscribe failed"),
            }
            if tx.send(TransportEvent::Error { ready_state: ReadyState::Connecting }).is_err() {
                return;
            }
            tokio::time::sleep(config.reconnect_delay()).await;
        }
    })
}

// ── Send ──────────────────────────────────────────────────────────────────────

pub struct HttpSender {
    client: reqwest::Client,
    config: Arc<RelayConfig>,
}

#[async_trait]
impl SenderTransport for HttpSender {
    async fn send(&self, body: &str, address: &str) -> Result<SendResponse, TransportError> {
        let url = self.config.send_url(address);
        let max_attempts = self.config.max_send_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.post(&url).body(body.to_string()).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if !status.is_success() {
                        warn!(%address, %status, "relay rejected post");
                    }
                    return Ok(SendResponse {
                        ok: status.is_success(),
                        status: status.as_u16(),
                        status_text: status.canonical_reason().unwrap_or_default().to_string(),
                    });
                }
                Err(err) if attempt < max_attempts => {
                    warn!(%address, attempt, error = %err, "send failed, retrying");
                    tokio::time::sleep(self.config.retry_delay(attempt)).await;
                }
                Err(err) => {
                    warn!(%address, attempt, error = %err, "send failed, giving up");
                    return Err(TransportError::SendExhausted {
                        address: address.to_string(),
                        attempts: attempt,
                    });
                }
            }
        }
    }
}
