use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::config::ProxyConfig;
use crate::events::EventSink;
use crate::execution::{
    CommandExecutor, ExecutionEngine, ExecutionError, ExecutionHandle, RequestScope,
};
use crate::models::{Command, ProxyResult, RequestContext};
use crate::registry::HandlerRegistry;

/// Resolve-then-execute facade over the registry and the engine
///
/// Also the [`CommandExecutor`] handed to handlers for nested commands; the engine only
/// holds a weak reference back to it.
pub struct ServiceProxy {
    registry: Arc<HandlerRegistry>,
    engine: Arc<ExecutionEngine>,
}

impl ServiceProxy {
    pub fn new(registry: Arc<HandlerRegistry>, engine: Arc<ExecutionEngine>) -> Arc<Self> {
        let proxy = Arc::new(Self { registry, engine });
        let executor: Arc<dyn CommandExecutor> = proxy.clone();
        proxy.engine.attach_executor(Arc::downgrade(&executor));
        proxy
    }

    /// Registry and engine built from configuration, publishing events to `sink`
    pub fn from_config(config: &ProxyConfig, sink: Arc<dyn EventSink>) -> Arc<Self> {
        let registry = Arc::new(HandlerRegistry::from_config(config));
        let engine = Arc::new(ExecutionEngine::new(config.engine.clone(), sink));
        Self::new(registry, engine)
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    /// Open the request-cache scope for `request`
    pub fn begin_request(&self, request: RequestContext) -> RequestScope {
        self.engine.begin_request(request)
    }

    /// Resolve `command` against `pool_name` (empty for the command's own pool) and run it
    pub async fn dispatch(
        &self,
        command: Command,
        pool_name: &str,
        request: RequestContext,
    ) -> Result<ProxyResult, ExecutionError> {
        let resolution = self.registry.resolve(&command.name, pool_name)?;
        self.engine.execute(&resolution, command, request).await
    }

    /// [`Self::dispatch`] for threads outside the async runtime
    pub fn dispatch_blocking(
        &self,
        command: Command,
        pool_name: &str,
        request: RequestContext,
    ) -> Result<ProxyResult, ExecutionError> {
        let resolution = self.registry.resolve(&command.name, pool_name)?;
        self.engine.execute_blocking(&resolution, command, request)
    }

    /// Start the command in the background; resolve failures come back through the handle
    pub fn dispatch_async(
        &self,
        command: Command,
        pool_name: &str,
        request: RequestContext,
    ) -> ExecutionHandle {
        match self.registry.resolve(&command.name, pool_name) {
            Ok(resolution) => self.engine.queue(resolution, command, request),
            Err(e) => ExecutionHandle::failed(request.request_id, e.into()),
        }
    }
}

#[async_trait]
impl CommandExecutor for ServiceProxy {
    async fn execute_command(
        &self,
        command: Command,
        request: RequestContext,
    ) -> Result<ProxyResult, ExecutionError> {
        let pool = command.requested_pool().unwrap_or_default().to_string();
        debug!(
            command = %command.name,
            pool = %pool,
            request_id = %request.request_id,
            "Nested command"
        );
        self.dispatch(command, &pool, request).await
    }
}

impl std::fmt::Debug for ServiceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("commands", &self.registry.commands())
            .finish()
    }
}
