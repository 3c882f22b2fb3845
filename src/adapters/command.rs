use std::sync::Arc;
use tracing::debug;

use super::proxy::ServiceProxy;
use crate::execution::ExecutionError;
use crate::models::{Command, ProxyResult, RequestContext};
use crate::registry::InvocationMode;

/// Bridges decoded protocol commands to the proxy
///
/// Every inbound command gets its own request scope. Any failure becomes an unsuccessful
/// [`ProxyResult`] carrying the error text, so the transport always has something to write.
#[derive(Debug, Clone)]
pub struct CommandProtocolAdapter {
    proxy: Arc<ServiceProxy>,
}

impl CommandProtocolAdapter {
    pub fn new(proxy: Arc<ServiceProxy>) -> Self {
        Self { proxy }
    }

    pub fn proxy(&self) -> &Arc<ServiceProxy> {
        &self.proxy
    }

    pub async fn handle(&self, command: Command) -> ProxyResult {
        match self.execute(command).await {
            Ok(result) => result,
            Err(e) => ProxyResult::failure(e.to_string()),
        }
    }

    async fn execute(&self, command: Command) -> Result<ProxyResult, ExecutionError> {
        let request = match command.request_id() {
            Some(id) if !id.is_empty() => RequestContext::with_request_id(id),
            _ => RequestContext::new(),
        };
        let pool = command.requested_pool().unwrap_or_default().to_string();
        let _scope = self.proxy.begin_request(request.clone());

        let resolution = self.proxy.registry().resolve(&command.name, &pool)?;
        match resolution.policy.invocation {
            InvocationMode::Sync => {
                self.proxy
                    .engine()
                    .execute(&resolution, command, request)
                    .await
            }
            InvocationMode::Async => {
                debug!(
                    command = %command.name,
                    pool = %resolution.pool_name,
                    request_id = %request.request_id,
                    "Dispatching command asynchronously"
                );
                // Fire and forget: the outcome is reported through the execution event.
                drop(self.proxy.engine().queue(resolution, command, request));
                Ok(ProxyResult::async_queued())
            }
        }
    }
}
