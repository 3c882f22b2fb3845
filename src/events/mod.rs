//! # Execution Events
//!
//! One [`ExecutionEvent`] is published per engine call, whatever the outcome, including
//! calls served from the request cache. Sinks are synchronous and must not block; a sink
//! error is logged by the engine and never changes the caller's result.

pub mod publisher;
pub mod request_logger;

pub use publisher::{EventPublisher, EventPublisherStats};
pub use request_logger::RequestLogger;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::execution::ExecutionState;

/// Observability record for a single execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionEvent {
    pub command_name: String,
    pub pool_name: String,
    pub outcome: ExecutionState,
    /// The returned result came from the fallback
    pub fell_back: bool,
    pub fallback_failed: bool,
    /// Served from the request cache without invoking the handler
    pub cached: bool,
    pub elapsed_ms: u64,
    pub handler_type: String,
    pub request_id: String,
    pub error: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ExecutionEvent {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Destination for execution events
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ExecutionEvent) -> Result<(), EventError>;
}

/// Sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: ExecutionEvent) -> Result<(), EventError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Event channel is closed")]
    ChannelClosed,
    #[error("Event sink error: {0}")]
    Sink(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
pub(crate) fn sample_event(command: &str, outcome: ExecutionState) -> ExecutionEvent {
    ExecutionEvent {
        command_name: command.to_string(),
        pool_name: command.to_string(),
        outcome,
        fell_back: false,
        fallback_failed: false,
        cached: false,
        elapsed_ms: 3,
        handler_type: "tests::Sample".to_string(),
        request_id: "req-1".to_string(),
        error: (!outcome.is_success()).then(|| "Handler failure: boom".to_string()),
        occurred_at: Utc::now(),
    }
}
