use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::ExecutionError;
use crate::models::{Command, ProxyResult, RequestContext};

/// Runs a command through registry resolution and the execution engine
///
/// Handlers reach this through [`InvocationContext::execute_command`] to issue nested
/// commands on behalf of the request they are serving.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute_command(
        &self,
        command: Command,
        request: RequestContext,
    ) -> Result<ProxyResult, ExecutionError>;
}

/// Per-invocation context handed to `Handler::invoke` and `Handler::fallback`
#[derive(Clone)]
pub struct InvocationContext {
    pub request: RequestContext,
    pub pool_name: String,
    cancellation: CancellationToken,
    executor: Option<Arc<dyn CommandExecutor>>,
}

impl InvocationContext {
    pub fn new(request: RequestContext, pool_name: impl Into<String>) -> Self {
        Self {
            request,
            pool_name: pool_name.into(),
            cancellation: CancellationToken::new(),
            executor: None,
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_executor(mut self, executor: Option<Arc<dyn CommandExecutor>>) -> Self {
        self.executor = executor;
        self
    }

    /// Set once the engine has abandoned this invocation
    ///
    /// Cancellation is cooperative: a handler that never checks keeps running, and
    /// whatever it eventually returns is discarded.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Issue a nested command within the same request (and request cache scope)
    pub async fn execute_command(&self, command: Command) -> Result<ProxyResult, ExecutionError> {
        match &self.executor {
            Some(executor) => executor.execute_command(command, self.request.clone()).await,
            None => Err(ExecutionError::Unavailable(format!(
                "no command executor available for nested command '{}'",
                command.name
            ))),
        }
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("request", &self.request)
            .field("pool_name", &self.pool_name)
            .field("cancelled", &self.is_cancelled())
            .field("has_executor", &self.executor.is_some())
            .finish()
    }
}
