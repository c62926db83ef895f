use std::env;
use std::time::Duration;

use thiserror::Error;
use url::Url;

const DEFAULT_RELAY_URL: &str = "ws://localhost:3000";
const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid relay url {url}: {reason}")]
    RelayUrl { url: String, reason: String },
}

/// Backoff used when the relay connection drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            max_attempts: None,
        }
    }
}

/// Huddle client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket address of the signaling relay
    pub relay_url: String,
    /// STUN/TURN urls handed to every peer connection
    pub ice_servers: Vec<String>,
    pub reconnect: ReconnectPolicy,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = ReconnectPolicy::default();
        let relay_url = env::var("HUDDLE_RELAY_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string());
        let ice_servers = env::var("HUDDLE_ICE_SERVERS")
            .map(|value| parse_list(&value))
            .unwrap_or_else(|_| vec![DEFAULT_ICE_SERVER.to_string()]);
        let initial_delay = env_millis("HUDDLE_RECONNECT_INITIAL_MS").unwrap_or(defaults.initial_delay);
        let max_delay = env_millis("HUDDLE_RECONNECT_MAX_MS").unwrap_or(defaults.max_delay);
        let max_attempts = env::var("HUDDLE_RECONNECT_ATTEMPTS")
            .ok()
            .and_then(|value| value.parse().ok());

        Self {
            relay_url,
            ice_servers,
            reconnect: ReconnectPolicy {
                initial_delay,
                max_delay: max_delay.max(initial_delay),
                max_attempts,
            },
        }
    }

    /// Relay url normalized to a websocket scheme.
    pub fn relay_websocket_url(&self) -> Result<Url, ConfigError> {
        websocket_url(&self.relay_url)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            reconnect: ReconnectPolicy::default(),
        }
    }
}

pub fn websocket_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::RelayUrl {
        url: raw.to_string(),
        reason,
    };
    let mut url = Url::parse(raw).map_err(|err| invalid(err.to_string()))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => return Err(invalid(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| invalid("cannot rewrite scheme".into()))?;
    Ok(url)
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_millis(var: &str) -> Option<Duration> {
    env::var(var)
        .ok()
        .and_then(|value| value.parse().ok())
        .map(Duration::from_millis)
}
