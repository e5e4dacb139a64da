//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::room::RoomId;

/// Top-level drawsync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<RelayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<HistoryConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

// --- Relay ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Outbound frames buffered per member before broadcasts start skipping it.
    #[serde(default = "default_member_queue")]
    pub member_queue: usize,

    /// Largest WebSocket message accepted from a client.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// How often the relay pings each member.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    /// A member that sends nothing (not even a pong) for this long is dropped.
    /// Also bounds a single write to a member's socket.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            member_queue: default_member_queue(),
            max_message_bytes: default_max_message_bytes(),
            ping_interval_ms: default_ping_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl RelayConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms.max(1))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms.max(1))
    }
}

fn default_bind() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8765
}

fn default_member_queue() -> usize {
    256
}

fn default_max_message_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_ping_interval_ms() -> u64 {
    20_000
}

fn default_idle_timeout_ms() -> u64 {
    60_000
}

// --- Client ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Relay WebSocket endpoint, without the `room` query parameter.
    #[serde(default = "default_client_url")]
    pub url: String,

    #[serde(default = "default_room")]
    pub room: String,

    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Ping interval; the link is declared dead after two silent intervals.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,

    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    /// Inbound messages buffered per local subscriber; a subscriber that
    /// falls this far behind misses messages until it catches up.
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_client_url(),
            room: default_room(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_step_ms: default_backoff_step_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            heartbeat_ms: default_heartbeat_ms(),
            outbound_queue: default_outbound_queue(),
            subscriber_queue: default_subscriber_queue(),
        }
    }
}

impl ClientConfig {
    pub fn room_id(&self) -> RoomId {
        RoomId::parse(Some(&self.room))
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }
}

fn default_client_url() -> String {
    "ws://127.0.0.1:8765/ws".into()
}

fn default_room() -> String {
    RoomId::DEFAULT.into()
}

fn default_backoff_initial_ms() -> u64 {
    500
}

fn default_backoff_step_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    10_000
}

fn default_heartbeat_ms() -> u64 {
    15_000
}

fn default_outbound_queue() -> usize {
    256
}

fn default_subscriber_queue() -> usize {
    1024
}

// --- History ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Maximum number of canvas states kept for undo.
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

fn default_history_capacity() -> usize {
    50
}

// --- Logging ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "drawsync_relay=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

static ENV_VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("static env var pattern"));

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);

        json5::from_str(&substituted)
            .map_err(|e| crate::error::DrawSyncError::Config(e.to_string()))
    }

    /// Default config file location.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn relay(&self) -> RelayConfig {
        self.relay.clone().unwrap_or_default()
    }

    pub fn client(&self) -> ClientConfig {
        self.client.clone().unwrap_or_default()
    }

    /// History capacity, never below one entry.
    pub fn history_capacity(&self) -> usize {
        self.history
            .as_ref()
            .map(|h| h.capacity)
            .unwrap_or_else(default_history_capacity)
            .max(1)
    }

    /// Get a config value by dotted path (e.g. "relay.port", "client.room").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(relay) = &self.relay {
            if relay.port == 0 {
                errors.push("Relay port cannot be 0".to_string());
            }
            if relay.member_queue == 0 {
                errors.push("relay.member_queue must be at least 1".to_string());
            }
            if relay.max_message_bytes == 0 {
                errors.push("relay.max_message_bytes must be at least 1".to_string());
            }
            if relay.ping_interval_ms == 0 || relay.idle_timeout_ms == 0 {
                errors.push("relay.ping_interval_ms and relay.idle_timeout_ms must be at least 1".to_string());
            } else if relay.idle_timeout_ms <= relay.ping_interval_ms {
                warnings.push(format!(
                    "relay.idle_timeout_ms ({}) is not above relay.ping_interval_ms ({}), quiet members will be dropped",
                    relay.idle_timeout_ms, relay.ping_interval_ms
                ));
            }
        }

        if let Some(client) = &self.client {
            if client.backoff_max_ms < client.backoff_initial_ms {
                errors.push(format!(
                    "client.backoff_max_ms ({}) is below client.backoff_initial_ms ({})",
                    client.backoff_max_ms, client.backoff_initial_ms
                ));
            }
            if client.outbound_queue == 0 {
                errors.push("client.outbound_queue must be at least 1".to_string());
            }
            if client.subscriber_queue == 0 {
                errors.push("client.subscriber_queue must be at least 1".to_string());
            }
            if client.heartbeat_ms == 0 {
                errors.push("client.heartbeat_ms must be at least 1".to_string());
            }
            if !client.url.starts_with("ws://") && !client.url.starts_with("wss://") {
                errors.push(format!("client.url is not a WebSocket URL: {}", client.url));
            }
            if client.room_id().as_str() != client.room.trim() {
                warnings.push(format!(
                    "client.room '{}' is not a valid room name, '{}' will be used",
                    client.room,
                    RoomId::DEFAULT
                ));
            }
        }

        if let Some(history) = &self.history {
            if history.capacity == 0 {
                warnings.push("history.capacity is 0, clamped to 1".to_string());
            }
        }

        (warnings, errors)
    }

}

/// Base directory for drawsync data: `~/.drawsync/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".drawsync")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, variable name is unique to this test
        unsafe { std::env::set_var("TEST_DS_ROOM", "studio") };
        let input = r#"{"room": "${TEST_DS_ROOM}", "other": "plain"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains("studio"));
        assert!(result.contains("plain"));
        unsafe { std::env::remove_var("TEST_DS_ROOM") };
    }

    #[test]
    fn test_env_var_missing() {
        let input = r#"{"key": "${NONEXISTENT_VAR_DS_TEST}"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains(r#""""#));
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.relay().port, 8765);
        assert_eq!(config.relay().bind, "0.0.0.0");
        assert_eq!(config.client().room, "default");
        assert_eq!(config.client().backoff_max_ms, 10_000);
        assert_eq!(config.history_capacity(), 50);
    }

    #[test]
    fn test_partial_sections_get_defaults() {
        let config: Config = json5::from_str(
            r#"{
                // comments are fine in json5
                relay: { port: 9000 },
                client: { room: "r1" },
                history: { capacity: 0 },
            }"#,
        )
        .unwrap();
        let relay = config.relay();
        assert_eq!(relay.port, 9000);
        assert_eq!(relay.member_queue, 256);
        assert_eq!(config.client().room_id().as_str(), "r1");
        assert_eq!(config.client().backoff_initial_ms, 500);
        assert_eq!(config.history_capacity(), 1);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.json")).unwrap();
        assert!(config.relay.is_none());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ relay: { port: 7001, bind: "127.0.0.1", idle_timeout_ms: 500 } }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        let relay = config.relay();
        assert_eq!(relay.port, 7001);
        assert_eq!(relay.bind, "127.0.0.1");
        assert_eq!(relay.idle_timeout(), Duration::from_millis(500));
        assert_eq!(relay.ping_interval(), Duration::from_secs(20));
        assert_eq!(config.client().subscriber_queue, 1024);
    }

    #[test]
    fn test_load_invalid_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ relay: ").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, crate::error::DrawSyncError::Config(_)));
    }

    #[test]
    fn test_get_path() {
        let config = Config {
            relay: Some(RelayConfig::default()),
            ..Config::default()
        };
        assert_eq!(config.get_path("relay.port"), Some(serde_json::json!(8765)));
        assert!(config.get_path("relay.nope").is_none());
        assert!(config.get_path("client.room").is_none());
    }

    #[test]
    fn test_logging_config_defaults() {
        let config: Config = json5::from_str(r#"{ "logging": {} }"#).unwrap();
        let logging = config.logging.expect("logging should be present");
        assert_eq!(logging.format, "plain");
        assert!(logging.level.is_none());
        assert_eq!(logging.output, "stderr");
        assert!(logging.filters.is_empty());
    }

    #[test]
    fn test_logging_config_filters() {
        let json_str = r#"{
            "logging": {
                "format": "json",
                "filters": ["drawsync_relay=debug", "drawsync_client=trace"]
            }
        }"#;
        let config: Config = json5::from_str(json_str).unwrap();
        let logging = config.logging.expect("logging should be present");
        assert_eq!(logging.format, "json");
        assert_eq!(logging.filters, vec!["drawsync_relay=debug", "drawsync_client=trace"]);
    }

    #[test]
    fn test_validate_default_is_clean() {
        let config = Config {
            relay: Some(RelayConfig::default()),
            client: Some(ClientConfig::default()),
            history: Some(HistoryConfig::default()),
            logging: None,
        };
        let (warnings, errors) = config.validate();
        assert!(warnings.is_empty(), "{warnings:?}");
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn test_validate_errors() {
        let config = Config {
            relay: Some(RelayConfig {
                port: 0,
                ..RelayConfig::default()
            }),
            client: Some(ClientConfig {
                backoff_initial_ms: 2_000,
                backoff_max_ms: 1_000,
                url: "http://example.com".into(),
                ..ClientConfig::default()
            }),
            ..Config::default()
        };
        let (_warnings, errors) = config.validate();
        assert!(errors.iter().any(|e| e.contains("port")), "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("backoff_max_ms")), "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("WebSocket URL")), "{errors:?}");
    }

    #[test]
    fn test_validate_warns_on_bad_room() {
        let config = Config {
            client: Some(ClientConfig {
                room: "not a room".into(),
                ..ClientConfig::default()
            }),
            ..Config::default()
        };
        let (warnings, errors) = config.validate();
        assert!(errors.is_empty());
        assert!(warnings.iter().any(|w| w.contains("not a room")));
    }

    #[test]
    fn test_validate_liveness_and_queues() {
        let config = Config {
            relay: Some(RelayConfig {
                ping_interval_ms: 30_000,
                idle_timeout_ms: 10_000,
                ..RelayConfig::default()
            }),
            client: Some(ClientConfig {
                subscriber_queue: 0,
                ..ClientConfig::default()
            }),
            ..Config::default()
        };
        let (warnings, errors) = config.validate();
        assert!(warnings.iter().any(|w| w.contains("idle_timeout_ms")), "{warnings:?}");
        assert!(errors.iter().any(|e| e.contains("subscriber_queue")), "{errors:?}");
    }
}
