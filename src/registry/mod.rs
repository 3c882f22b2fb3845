//! # Handler Registry
//!
//! Maps command names to handlers, owns handler activation status, and resolves each
//! command to the [`ExecutionPolicy`] the engine runs it under.
//!
//! ## Architecture
//!
//! ```text
//! Registry
//! ├── Handler / RegisteredHandler   (SPI + status the registry alone writes)
//! ├── HandlerSettings               (declared tuning, overridable from configuration)
//! ├── sanitize_identifier           (pool / metric key hygiene)
//! └── HandlerRegistry::resolve      (command → handler + pool + policy)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use switchyard_core::registry::HandlerRegistry;
//! # use switchyard_core::registry::Handler;
//! # use std::sync::Arc;
//!
//! # async fn example(handler: Arc<dyn Handler>) -> Result<(), Box<dyn std::error::Error>> {
//! let registry = HandlerRegistry::default();
//! registry.register(handler).await?;
//!
//! let resolution = registry.resolve("ping", "")?;
//! println!("{} runs on pool {}", resolution.handler.name(), resolution.pool_name);
//! # Ok(())
//! # }
//! ```

pub mod handler;
pub mod handler_registry;
pub mod policy;
pub mod sanitize;
pub mod settings;

pub use handler::{Handler, HandlerContext, HandlerError, HandlerStatus, RegisteredHandler};
pub use handler_registry::{HandlerRegistry, RegistryStats, Resolution};
pub use policy::{CacheKeyFn, ExecutionPolicy, InvocationMode, Isolation, IsolationStrategy};
pub use sanitize::sanitize_identifier;
pub use settings::HandlerSettings;

use thiserror::Error;

/// Registry and resolution errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("No handler registered for command '{command}'")]
    UnknownCommand { command: String },

    #[error("Handler '{handler}' for command '{command}' is not active")]
    HandlerInactive { handler: String, command: String },

    #[error("Command '{command}' is already served by handler '{existing}'; '{attempted}' rejected")]
    DuplicateCommand {
        command: String,
        existing: String,
        attempted: String,
    },

    #[error("Handler '{name}' is already registered")]
    DuplicateHandler { name: String },

    #[error("Handler '{handler}' declares no commands")]
    NoCommands { handler: String },

    #[error("Handler '{handler}' declares unusable command name '{command}'")]
    InvalidCommandName { handler: String, command: String },

    #[error("Invalid settings for handler '{handler}': {reason}")]
    InvalidSettings { handler: String, reason: String },

    #[error("Handler '{name}' not found")]
    HandlerNotFound { name: String },

    #[error("Handler '{handler}' failed to initialize: {reason}")]
    InitializationFailed { handler: String, reason: String },

    #[error("Handler '{handler}' failed to shut down: {reason}")]
    ShutdownFailed { handler: String, reason: String },
}
