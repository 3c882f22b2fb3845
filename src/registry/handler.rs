//! # Handler SPI
//!
//! A handler is a named unit of backend logic serving one or more commands. The registry
//! drives its lifecycle (`init` once, then active until `shutdown`); the execution engine
//! calls `invoke`, and `fallback` when the primary path fails, is rejected or times out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;

use super::policy::{CacheKeyFn, IsolationStrategy};
use super::settings::HandlerSettings;
use crate::execution::InvocationContext;
use crate::models::{Command, ProxyResult};

/// Errors raised by handler code
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("Invocation cancelled")]
    Cancelled,
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(error: anyhow::Error) -> Self {
        Self::Failed(format!("{error:#}"))
    }
}

/// Context handed to `init` and `shutdown`
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub handler_name: String,
    /// Effective settings after configuration overrides
    pub settings: HandlerSettings,
}

#[async_trait]
pub trait Handler: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Implementation type reported on observability events
    fn type_name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Command names this handler serves
    fn commands(&self) -> Vec<String>;

    fn details(&self) -> String {
        format!("{} serving {:?}", self.name(), self.commands())
    }

    async fn init(&self, _ctx: &HandlerContext) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn shutdown(&self, _ctx: &HandlerContext) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Execute a command. `Ok(None)` means the handler had nothing to return.
    async fn invoke(
        &self,
        ctx: &InvocationContext,
        command: &Command,
    ) -> Result<Option<ProxyResult>, HandlerError>;

    /// Fallback for a failed, rejected or timed-out invocation; `None` when unsupported
    async fn fallback(
        &self,
        _ctx: &InvocationContext,
        _command: &Command,
    ) -> Option<Result<ProxyResult, HandlerError>> {
        None
    }

    /// Enables request-scoped de-duplication of identical calls
    fn cache_key_fn(&self) -> Option<CacheKeyFn> {
        None
    }

    fn isolation_strategy(&self) -> IsolationStrategy {
        IsolationStrategy::ThreadPool
    }

    fn settings(&self) -> HandlerSettings {
        HandlerSettings::default()
    }
}

/// Handler activation state, written only by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandlerStatus {
    Inactive = 0,
    Active = 1,
}

impl From<u8> for HandlerStatus {
    fn from(value: u8) -> Self {
        match value {
            1 => HandlerStatus::Active,
            _ => HandlerStatus::Inactive,
        }
    }
}

impl fmt::Display for HandlerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inactive => write!(f, "inactive"),
            Self::Active => write!(f, "active"),
        }
    }
}

/// A handler as held by the registry, with its resolved settings and status
pub struct RegisteredHandler {
    handler: Arc<dyn Handler>,
    name: String,
    commands: Vec<String>,
    settings: HandlerSettings,
    generation: u64,
    status: AtomicU8,
}

impl RegisteredHandler {
    pub(crate) fn new(handler: Arc<dyn Handler>, settings: HandlerSettings, generation: u64) -> Self {
        Self {
            name: handler.name().to_string(),
            commands: handler.commands(),
            handler,
            settings,
            generation,
            status: AtomicU8::new(HandlerStatus::Inactive as u8),
        }
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn settings(&self) -> &HandlerSettings {
        &self.settings
    }

    /// Number of times this handler name has been hot-reloaded
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn type_name(&self) -> &str {
        self.handler.type_name()
    }

    pub fn status(&self) -> HandlerStatus {
        HandlerStatus::from(self.status.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.status() == HandlerStatus::Active
    }

    pub(crate) fn set_status(&self, status: HandlerStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub(crate) fn context(&self) -> HandlerContext {
        HandlerContext {
            handler_name: self.name.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredHandler")
            .field("name", &self.name)
            .field("type_name", &self.type_name())
            .field("commands", &self.commands)
            .field("generation", &self.generation)
            .field("status", &self.status())
            .finish()
    }
}
