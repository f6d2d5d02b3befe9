use anyhow::{anyhow, Result};
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000";
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;
pub const DEFAULT_STREAM_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_STREAM_RETRY_MS: u64 = 3_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
pub const DEFAULT_SOCKET_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_SOCKET_BACKOFF_MS: u64 = 1_000;

/// Settings of the `chatline` server binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub heartbeat: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind_addr = parse_var(&lookup, "CHAT_BIND_ADDR", || {
            SocketAddr::from_str(DEFAULT_BIND_ADDR).map_err(|e| anyhow!(e))
        })?;
        let heartbeat_secs: u64 =
            parse_var(&lookup, "CHAT_HEARTBEAT_SECS", || Ok(DEFAULT_HEARTBEAT_SECS))?;
        if heartbeat_secs == 0 {
            return Err(anyhow!("CHAT_HEARTBEAT_SECS must be greater than zero"));
        }

        Ok(Self {
            bind_addr,
            heartbeat: Duration::from_secs(heartbeat_secs),
        })
    }
}

/// Which live-update mechanism a client uses. Chosen at deploy time, not
/// negotiated at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStrategy {
    /// Push stream, falling back to polling after repeated failures
    Stream,
    /// WebSocket with its own reconnect policy
    Socket,
    /// Polling only
    Polling,
}

impl FromStr for TransportStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stream" | "sse" => Ok(Self::Stream),
            "socket" | "websocket" | "ws" => Ok(Self::Socket),
            "polling" | "poll" => Ok(Self::Polling),
            other => Err(format!("unknown transport `{other}`")),
        }
    }
}

/// How the polling service decides a fetched snapshot is new.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDiff {
    /// Only a change in the number of sessions counts. Misses in-place edits.
    Count,
    /// Any difference in the snapshot counts.
    Content,
}

impl FromStr for PollDiff {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "count" => Ok(Self::Count),
            "content" => Ok(Self::Content),
            other => Err(format!("unknown poll diff `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPolicy {
    /// Consecutive failures before the stream is abandoned for polling
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for StreamPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_STREAM_MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_STREAM_RETRY_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketPolicy {
    pub max_attempts: u32,
    /// The n-th retry waits `backoff_base * n`
    pub backoff_base: Duration,
}

impl Default for SocketPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_SOCKET_MAX_ATTEMPTS,
            backoff_base: Duration::from_millis(DEFAULT_SOCKET_BACKOFF_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub diff: PollDiff,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            diff: PollDiff::Content,
        }
    }
}

/// Settings of a live-update client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub session_id: Option<String>,
    pub strategy: TransportStrategy,
    pub stream: StreamPolicy,
    pub socket: SocketPolicy,
    pub poll: PollPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            session_id: None,
            strategy: TransportStrategy::Stream,
            stream: StreamPolicy::default(),
            socket: SocketPolicy::default(),
            poll: PollPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let server_url = lookup("CHAT_SERVER_URL")
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .unwrap_or(defaults.server_url);
        let session_id = lookup("CHAT_SESSION_ID").filter(|id| !id.trim().is_empty());
        let strategy = parse_var(&lookup, "CHAT_TRANSPORT", || Ok(defaults.strategy))?;

        let stream = StreamPolicy {
            max_attempts: parse_var(&lookup, "CHAT_STREAM_MAX_ATTEMPTS", || {
                Ok(defaults.stream.max_attempts)
            })?,
            retry_delay: parse_millis(&lookup, "CHAT_STREAM_RETRY_MS", defaults.stream.retry_delay)?,
        };
        let socket = SocketPolicy {
            max_attempts: parse_var(&lookup, "CHAT_SOCKET_MAX_ATTEMPTS", || {
                Ok(defaults.socket.max_attempts)
            })?,
            backoff_base: parse_millis(
                &lookup,
                "CHAT_SOCKET_BACKOFF_MS",
                defaults.socket.backoff_base,
            )?,
        };
        let poll = PollPolicy {
            interval: parse_millis(&lookup, "CHAT_POLL_INTERVAL_MS", defaults.poll.interval)?,
            diff: parse_var(&lookup, "CHAT_POLL_DIFF", || Ok(defaults.poll.diff))?,
        };

        if stream.max_attempts == 0 || socket.max_attempts == 0 {
            return Err(anyhow!("reconnect attempt limits must be at least 1"));
        }
        if poll.interval.is_zero() {
            return Err(anyhow!("CHAT_POLL_INTERVAL_MS must be greater than zero"));
        }

        Ok(Self {
            server_url,
            session_id,
            strategy,
            stream,
            socket,
            poll,
        })
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: impl FnOnce() -> Result<T>,
) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid {key}={raw:?}: {e}")),
        None => default(),
    }
}

fn parse_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    parse_var(lookup, key, || Ok(default.as_millis() as u64)).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn server_defaults() {
        let config = ServerConfig::from_lookup(env(&[])).unwrap();
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.heartbeat, Duration::from_secs(30));
    }

    #[test]
    fn server_overrides_and_rejects_garbage() {
        let config = ServerConfig::from_lookup(env(&[
            ("CHAT_BIND_ADDR", "127.0.0.1:8080"),
            ("CHAT_HEARTBEAT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.heartbeat, Duration::from_secs(5));

        let err = ServerConfig::from_lookup(env(&[("CHAT_HEARTBEAT_SECS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("CHAT_HEARTBEAT_SECS"));
        assert!(ServerConfig::from_lookup(env(&[("CHAT_HEARTBEAT_SECS", "0")])).is_err());
    }

    #[test]
    fn client_defaults() {
        let config = ClientConfig::from_lookup(env(&[])).unwrap();
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert_eq!(config.strategy, TransportStrategy::Stream);
        assert_eq!(config.stream.max_attempts, 3);
        assert_eq!(config.stream.retry_delay, Duration::from_secs(3));
        assert_eq!(config.socket.max_attempts, 5);
        assert_eq!(config.socket.backoff_base, Duration::from_secs(1));
        assert_eq!(config.poll.interval, Duration::from_secs(3));
        assert_eq!(config.poll.diff, PollDiff::Content);
        assert!(config.session_id.is_none());
    }

    #[test]
    fn client_overrides() {
        let config = ClientConfig::from_lookup(env(&[
            ("CHAT_SERVER_URL", "http://chat.internal:9000/"),
            ("CHAT_SESSION_ID", "ses_abc"),
            ("CHAT_TRANSPORT", "WebSocket"),
            ("CHAT_POLL_INTERVAL_MS", "2000"),
            ("CHAT_POLL_DIFF", "count"),
            ("CHAT_SOCKET_BACKOFF_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.server_url, "http://chat.internal:9000");
        assert_eq!(config.session_id.as_deref(), Some("ses_abc"));
        assert_eq!(config.strategy, TransportStrategy::Socket);
        assert_eq!(config.poll.interval, Duration::from_secs(2));
        assert_eq!(config.poll.diff, PollDiff::Count);
        assert_eq!(config.socket.backoff_base, Duration::from_millis(250));
    }

    #[test]
    fn client_rejects_invalid_values() {
        let err = ClientConfig::from_lookup(env(&[("CHAT_TRANSPORT", "carrier-pigeon")]))
            .unwrap_err();
        assert!(err.to_string().contains("CHAT_TRANSPORT"));
        assert!(ClientConfig::from_lookup(env(&[("CHAT_STREAM_MAX_ATTEMPTS", "0")])).is_err());
        assert!(ClientConfig::from_lookup(env(&[("CHAT_POLL_INTERVAL_MS", "-1")])).is_err());
    }
}
