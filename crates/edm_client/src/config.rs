//! Client configuration.
//!
//! Defaults match the public relay deployment and the stock chat timings.
//! Everything is serde-serialisable so a front-end can persist overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const RELAY_URL_ENV: &str = "EDM_RELAY_URL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Delay after a successful send before a keepalive ack is considered.
    pub ack_poll_secs: u64,
    /// Delay after a received message before the partner may be flagged idle.
    pub idle_check_secs: u64,
    /// Consecutive undecryptable messages before `dead_session` is raised.
    pub dead_session_threshold: u32,
    /// Display name announced by the joiner until a username is set.
    pub joiner_name: String,
    /// Display name announced by the initiator until a username is set.
    pub initiator_name: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            ack_poll_secs: 31,
            idle_check_secs: 61,
            dead_session_threshold: 9,
            joiner_name: "👽".to_string(),
            initiator_name: "🤡".to_string(),
        }
    }
}

impl ChatConfig {
    pub fn ack_poll_delay(&self) -> Duration {
        Duration::from_secs(self.ack_poll_secs)
    }

    pub fn idle_check_delay(&self) -> Duration {
        Duration::from_secs(self.idle_check_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub base_url: String,
    /// Appended to `base_url`, followed by the address.
    pub send_path: String,
    pub subscribe_path: String,
    pub max_send_attempts: u32,
    /// First retry delay; doubles on every further attempt.
    pub retry_base_delay_ms: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            send_path: "/api/send?channelId=".to_string(),
            subscribe_path: "/api/sse?channelId=".to_string(),
            max_send_attempts: 5,
            retry_base_delay_ms: 1_000,
            reconnect_delay_ms: 3_000,
        }
    }
}

impl RelayConfig {
    /// Defaults, with the base URL taken from `EDM_RELAY_URL` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(RELAY_URL_ENV) {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        config
    }

    pub fn send_url(&self, address: &str) -> String {
        format!("{}{}{}", self.base_url, self.send_path, address)
    }

    pub fn subscribe_url(&self, address: &str) -> String {
        format!("{}{}{}", self.base_url, self.subscribe_path, address)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_append_address() {
        let config = RelayConfig {
            base_url: "https://relay.example".into(),
            ..Default::default()
        };
        assert_eq!(
            config.send_url("abc"),
            "https://relay.example/api/send?channelId=abc"
        );
        assert_eq!(
            config.subscribe_url("abc"),
            "https://relay.example/api/sse?channelId=abc"
        );
    }

    #[test]
    fn retry_delay_doubles() {
        let config = RelayConfig::default();
        assert_eq!(config.retry_delay(1), Duration::from_secs(1));
        assert_eq!(config.retry_delay(2), Duration::from_secs(2));
        assert_eq!(config.retry_delay(4), Duration::from_secs(8));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: ChatConfig = serde_json::from_str(r#"{"dead_session_threshold": 3}"#).unwrap();
        assert_eq!(config.dead_session_threshold, 3);
        assert_eq!(config.ack_poll_secs, 31);
        assert_eq!(config.idle_check_secs, 61);
    }
}
