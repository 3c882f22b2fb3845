//! # Switchyard Configuration System
//!
//! YAML-based configuration with environment overrides. Every section has defaults, so a
//! proxy can be built without a file; a file only needs to name what it changes.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use switchyard_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration (environment auto-detected)
//! let manager = ConfigManager::load()?;
//!
//! let timeout = manager.config().engine.default_timeout();
//! let bind = &manager.config().server.bind_address;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::constants::{defaults, protocol};
use crate::registry::HandlerSettings;

/// Root configuration structure mirroring switchyard-config.yaml
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Execution engine defaults
    pub engine: EngineConfig,

    /// Command protocol codec limits
    pub codec: CodecConfig,

    /// TCP command server settings
    pub server: ServerConfig,

    /// Execution event publishing
    pub events: EventsConfig,

    /// Per-handler overrides keyed by handler name
    pub handlers: HashMap<String, HandlerSettings>,
}

/// Defaults applied when a handler's settings say nothing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub default_timeout_ms: u64,
    pub default_max_concurrency: usize,
    /// Waiting slots per thread-pool bulkhead; 0 hands off directly to a worker
    pub default_queue_capacity: usize,
    /// How long a semaphore bulkhead waits for a permit; 0 rejects immediately
    pub semaphore_acquire_timeout_ms: u64,
    pub fallback_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: defaults::EXECUTOR_TIMEOUT_MS,
            default_max_concurrency: defaults::POOL_SIZE,
            default_queue_capacity: defaults::QUEUE_CAPACITY,
            semaphore_acquire_timeout_ms: defaults::SEMAPHORE_ACQUIRE_TIMEOUT_MS,
            fallback_enabled: true,
        }
    }
}

impl EngineConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn semaphore_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.semaphore_acquire_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CodecConfig {
    pub max_line_size: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_line_size: protocol::MAX_COMMAND_INPUT,
        }
    }
}

/// How the TCP server treats a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// Any number of commands per connection until the client closes or goes idle
    #[default]
    Persistent,
    /// One command, one response, then close
    OneShot,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persistent => write!(f, "persistent"),
            Self::OneShot => write!(f, "one_shot"),
        }
    }
}

impl FromStr for ConnectionMode {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "persistent" => Ok(Self::Persistent),
            "one_shot" | "oneshot" => Ok(Self::OneShot),
            other => Err(ConfigurationError::invalid_value(
                "server.connection_mode",
                other,
                "expected 'persistent' or 'one_shot'",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub max_connections: usize,
    pub idle_timeout_ms: u64,
    pub graceful_shutdown_timeout_ms: u64,
    pub connection_mode: ConnectionMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: defaults::BIND_ADDRESS.to_string(),
            max_connections: defaults::MAX_CONNECTIONS,
            idle_timeout_ms: defaults::IDLE_TIMEOUT_MS,
            graceful_shutdown_timeout_ms: defaults::GRACEFUL_SHUTDOWN_TIMEOUT_MS,
            connection_mode: ConnectionMode::default(),
        }
    }
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn graceful_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.graceful_shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
    /// Spawn a [`RequestLogger`](crate::events::RequestLogger) on the event channel
    pub request_logging: bool,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: defaults::EVENT_CHANNEL_CAPACITY,
            request_logging: false,
        }
    }
}

impl ProxyConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let positive = [
            ("engine.default_timeout_ms", self.engine.default_timeout_ms),
            (
                "engine.default_max_concurrency",
                self.engine.default_max_concurrency as u64,
            ),
            ("codec.max_line_size", self.codec.max_line_size as u64),
            ("server.max_connections", self.server.max_connections as u64),
            ("server.idle_timeout_ms", self.server.idle_timeout_ms),
            ("events.channel_capacity", self.events.channel_capacity as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    "0",
                    "must be greater than 0",
                ));
            }
        }

        if self.server.bind_address.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "server.bind_address",
                "server configuration",
            ));
        }

        for (name, settings) in &self.handlers {
            settings.validate().map_err(|reason| {
                ConfigurationError::invalid_value(format!("handlers.{name}"), "", reason)
            })?;
        }

        Ok(())
    }
}
