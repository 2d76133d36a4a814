//! Server configuration
//!
//! Plain values with defaults, overridable through `FOLLOWER_MAZE_*`
//! environment variables. An unparsable value is an error, never a silent
//! fallback to the default.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::delivery::{QueueOverflowAction, DEFAULT_QUEUE_CAPACITY};
use crate::error::ConfigError;
use crate::registry::RegistryConfig;
use crate::reorder::{OverflowAction, ReorderConfig, DEFAULT_CAPACITY, DEFAULT_MAX_GAP_WAIT};

pub const ENV_EVENT_ADDR: &str = "FOLLOWER_MAZE_EVENT_ADDR";
pub const ENV_CLIENT_ADDR: &str = "FOLLOWER_MAZE_CLIENT_ADDR";
pub const ENV_ADMIN_ADDR: &str = "FOLLOWER_MAZE_ADMIN_ADDR";
pub const ENV_REORDER_CAPACITY: &str = "FOLLOWER_MAZE_REORDER_CAPACITY";
pub const ENV_REORDER_MAX_GAP_MS: &str = "FOLLOWER_MAZE_REORDER_MAX_GAP_MS";
pub const ENV_REORDER_OVERFLOW: &str = "FOLLOWER_MAZE_REORDER_OVERFLOW";
pub const ENV_CLIENT_QUEUE_CAPACITY: &str = "FOLLOWER_MAZE_CLIENT_QUEUE_CAPACITY";
pub const ENV_CLIENT_QUEUE_OVERFLOW: &str = "FOLLOWER_MAZE_CLIENT_QUEUE_OVERFLOW";
pub const ENV_HANDSHAKE_TIMEOUT_MS: &str = "FOLLOWER_MAZE_HANDSHAKE_TIMEOUT_MS";
pub const ENV_MAX_LINE_LENGTH: &str = "FOLLOWER_MAZE_MAX_LINE_LENGTH";
pub const ENV_CONNECTION_QUEUE: &str = "FOLLOWER_MAZE_CONNECTION_QUEUE";

/// Default event-source listen address
const DEFAULT_EVENT_ADDR: &str = "0.0.0.0:9090";

/// Default client listen address
const DEFAULT_CLIENT_ADDR: &str = "0.0.0.0:9099";

/// Default time a client gets to send its id
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default maximum event or handshake line length (bytes)
const DEFAULT_MAX_LINE_LENGTH: usize = 1024;

/// Default size of the accept → handler hand-off queue
const DEFAULT_CONNECTION_QUEUE: usize = 128;

/// Default size of the event-source → sequencer channel
const DEFAULT_INGEST_QUEUE: usize = 10_000;

/// Complete server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Event-source listen address
    pub event_addr: String,
    /// Client listen address
    pub client_addr: String,
    /// Admin HTTP listen address; `None` disables the admin API
    pub admin_addr: Option<String>,
    pub reorder: ReorderConfig,
    pub registry: RegistryConfig,
    /// Time allowed for a client's id line (zero = no limit)
    pub handshake_timeout: Duration,
    /// Lines longer than this are discarded
    pub max_line_length: usize,
    /// Accepted connections waiting for a handler
    pub connection_queue: usize,
    /// Parsed events waiting for the sequencer
    pub ingest_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            event_addr: DEFAULT_EVENT_ADDR.to_string(),
            client_addr: DEFAULT_CLIENT_ADDR.to_string(),
            admin_addr: None,
            reorder: ReorderConfig {
                capacity: DEFAULT_CAPACITY,
                max_gap_wait: Some(DEFAULT_MAX_GAP_WAIT),
                overflow: OverflowAction::RejectSource,
            },
            registry: RegistryConfig {
                queue_capacity: DEFAULT_QUEUE_CAPACITY,
                overflow: QueueOverflowAction::Disconnect,
            },
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            connection_queue: DEFAULT_CONNECTION_QUEUE,
            ingest_queue: DEFAULT_INGEST_QUEUE,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by `lookup(key)` for every known key
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup(ENV_EVENT_ADDR) {
            config.event_addr = addr;
        }
        if let Some(addr) = lookup(ENV_CLIENT_ADDR) {
            config.client_addr = addr;
        }
        config.admin_addr = lookup(ENV_ADMIN_ADDR).filter(|addr| !addr.is_empty());

        if let Some(value) = lookup(ENV_REORDER_CAPACITY) {
            config.reorder.capacity = parse_positive(ENV_REORDER_CAPACITY, &value)?;
        }
        if let Some(value) = lookup(ENV_REORDER_MAX_GAP_MS) {
            let millis: u64 = parse_value(ENV_REORDER_MAX_GAP_MS, &value)?;
            config.reorder.max_gap_wait = (millis > 0).then(|| Duration::from_millis(millis));
        }
        if let Some(value) = lookup(ENV_REORDER_OVERFLOW) {
            config.reorder.overflow = match value.to_ascii_lowercase().as_str() {
                "reject" | "reject_source" => OverflowAction::RejectSource,
                "skip" | "skip_gap" => OverflowAction::SkipGap,
                _ => return Err(invalid(ENV_REORDER_OVERFLOW, &value, "expected reject or skip")),
            };
        }
        if let Some(value) = lookup(ENV_CLIENT_QUEUE_CAPACITY) {
            config.registry.queue_capacity = parse_positive(ENV_CLIENT_QUEUE_CAPACITY, &value)?;
        }
        if let Some(value) = lookup(ENV_CLIENT_QUEUE_OVERFLOW) {
            config.registry.overflow = match value.to_ascii_lowercase().as_str() {
                "disconnect" => QueueOverflowAction::Disconnect,
                "drain" | "drain_then_disconnect" => QueueOverflowAction::DrainThenDisconnect,
                _ => {
                    return Err(invalid(
                        ENV_CLIENT_QUEUE_OVERFLOW,
                        &value,
                        "expected disconnect or drain",
                    ))
                }
            };
        }
        if let Some(value) = lookup(ENV_HANDSHAKE_TIMEOUT_MS) {
            let millis: u64 = parse_value(ENV_HANDSHAKE_TIMEOUT_MS, &value)?;
            config.handshake_timeout = Duration::from_millis(millis);
        }
        if let Some(value) = lookup(ENV_MAX_LINE_LENGTH) {
            config.max_line_length = parse_positive(ENV_MAX_LINE_LENGTH, &value)?;
        }
        if let Some(value) = lookup(ENV_CONNECTION_QUEUE) {
            config.connection_queue = parse_positive(ENV_CONNECTION_QUEUE, &value)?;
        }

        Ok(config)
    }

    /// Config bound to ephemeral localhost ports, for tests
    pub fn local() -> Self {
        Self {
            event_addr: "127.0.0.1:0".to_string(),
            client_addr: "127.0.0.1:0".to_string(),
            ..Default::default()
        }
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_value<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(key, value, &e.to_string()))
}

fn parse_positive(key: &'static str, value: &str) -> Result<usize, ConfigError> {
    match parse_value::<usize>(key, value)? {
        0 => Err(invalid(key, value, "must be greater than zero")),
        n => Ok(n),
    }
}
