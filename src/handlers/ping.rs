use async_trait::async_trait;

use crate::execution::InvocationContext;
use crate::models::{Command, ProxyResult};
use crate::registry::{Handler, HandlerError, IsolationStrategy};

/// Liveness check: answers `pong`, echoing any payload back
///
/// Runs under a semaphore bulkhead; there is nothing to gain from a worker hand-off.
#[derive(Debug, Default, Clone, Copy)]
pub struct PingHandler;

#[async_trait]
impl Handler for PingHandler {
    fn name(&self) -> &str {
        "ping"
    }

    fn commands(&self) -> Vec<String> {
        vec!["ping".to_string()]
    }

    async fn invoke(
        &self,
        _ctx: &InvocationContext,
        command: &Command,
    ) -> Result<Option<ProxyResult>, HandlerError> {
        let mut result = ProxyResult::success().with_message("pong");
        if !command.payload_bytes().is_empty() {
            result = result.with_data(command.payload_bytes().to_vec());
        }
        Ok(Some(result))
    }

    fn isolation_strategy(&self) -> IsolationStrategy {
        IsolationStrategy::Semaphore
    }
}
