//! # Execution
//!
//! Isolated, time-bounded command execution. The [`ExecutionEngine`] takes a
//! [`Resolution`](crate::registry::Resolution) from the registry and drives it through
//! bulkhead admission, the handler call, fallback and event emission.
//!
//! ## Components
//!
//! - [`ExecutionEngine`]: sync, blocking and queued entry points
//! - [`BulkheadRegistry`]: lazily created thread-pool and semaphore bulkheads, keyed by pool
//! - [`RequestCache`] / [`RequestScope`]: per-request de-duplication of identical calls
//! - [`ExecutionTracker`]: forward-only execution state machine
//! - [`InvocationContext`]: what a handler sees during `invoke`

pub mod bulkhead;
pub mod context;
pub mod engine;
pub mod handle;
pub mod request_cache;
pub mod state;

pub use bulkhead::{
    bulkhead_key, BulkheadPermit, BulkheadRegistry, BulkheadRejected, BulkheadStats, SemaphoreBulkhead,
    ThreadPoolBulkhead,
};
pub use context::{CommandExecutor, InvocationContext};
pub use engine::ExecutionEngine;
pub use handle::ExecutionHandle;
pub use request_cache::{RequestCache, RequestScope};
pub use state::{CompletedExecution, ExecutionState, ExecutionTracker};

use thiserror::Error;

use crate::registry::RegistryError;

/// Root-cause error of a failed execution
///
/// Clone so that a cached failure can be handed to every caller sharing it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Unknown command: {command}")]
    UnknownCommand { command: String },

    #[error("Handler {handler} is not active")]
    HandlerInactive { handler: String },

    #[error("Bulkhead for pool '{pool}' is saturated")]
    Rejected { pool: String },

    #[error("Command {command} timed out after {timeout_ms}ms")]
    TimedOut { command: String, timeout_ms: u64 },

    #[error("Handler failure: {0}")]
    HandlerFailure(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Execution unavailable: {0}")]
    Unavailable(String),
}

impl From<RegistryError> for ExecutionError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::UnknownCommand { command } => Self::UnknownCommand { command },
            RegistryError::HandlerInactive { handler, .. } => Self::HandlerInactive { handler },
            other => Self::Registry(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_errors_keep_their_kind() {
        let unknown: ExecutionError = RegistryError::UnknownCommand {
            command: "nope".to_string(),
        }
        .into();
        assert_eq!(
            unknown,
            ExecutionError::UnknownCommand {
                command: "nope".to_string()
            }
        );

        let other: ExecutionError = RegistryError::HandlerNotFound {
            name: "h".to_string(),
        }
        .into();
        assert!(matches!(other, ExecutionError::Registry(_)));
    }

    #[test]
    fn test_timeout_message() {
        let err = ExecutionError::TimedOut {
            command: "slow".to_string(),
            timeout_ms: 250,
        };
        assert_eq!(err.to_string(), "Command slow timed out after 250ms");
    }
}
