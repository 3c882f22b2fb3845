//! Handlers with controllable behavior for integration tests

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use switchyard_core::execution::InvocationContext;
use switchyard_core::models::{Command, ProxyResult};
use switchyard_core::registry::{
    CacheKeyFn, Handler, HandlerError, HandlerSettings, IsolationStrategy,
};

/// Sleeps for `delay_ms` (param, else the configured delay) and counts calls
#[derive(Debug)]
pub struct SlowHandler {
    pub name: String,
    pub delay: Duration,
    pub isolation: IsolationStrategy,
    pub settings: HandlerSettings,
    pub calls: AtomicUsize,
    pub cancelled: AtomicUsize,
    pub with_fallback: bool,
}

impl SlowHandler {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
            isolation: IsolationStrategy::ThreadPool,
            settings: HandlerSettings::default(),
            calls: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
            with_fallback: false,
        }
    }

    pub fn with_isolation(mut self, isolation: IsolationStrategy) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_settings(mut self, settings: HandlerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_fallback(mut self) -> Self {
        self.with_fallback = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for SlowHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn commands(&self) -> Vec<String> {
        vec![self.name.clone()]
    }

    async fn invoke(
        &self,
        ctx: &InvocationContext,
        command: &Command,
    ) -> Result<Option<ProxyResult>, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = command
            .param("delay_ms")
            .and_then(|ms| ms.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(self.delay);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                Ok(Some(ProxyResult::success().with_message(format!("{} done", self.name))))
            }
            _ = ctx.cancelled() => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                Err(HandlerError::Cancelled)
            }
        }
    }

    async fn fallback(
        &self,
        _ctx: &InvocationContext,
        _command: &Command,
    ) -> Option<Result<ProxyResult, HandlerError>> {
        self.with_fallback
            .then(|| Ok(ProxyResult::success().with_message("fallback")))
    }

    fn isolation_strategy(&self) -> IsolationStrategy {
        self.isolation
    }

    fn settings(&self) -> HandlerSettings {
        self.settings.clone()
    }
}

/// Blocks every invocation until released, so tests can hold bulkhead capacity
#[derive(Debug, Default)]
pub struct GateHandler {
    pub entered: AtomicUsize,
    pub release: Notify,
}

impl GateHandler {
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    pub fn open(&self) {
        self.release.notify_waiters();
    }
}

#[async_trait]
impl Handler for GateHandler {
    fn name(&self) -> &str {
        "gate"
    }

    fn commands(&self) -> Vec<String> {
        vec!["gate".to_string()]
    }

    async fn invoke(
        &self,
        _ctx: &InvocationContext,
        _command: &Command,
    ) -> Result<Option<ProxyResult>, HandlerError> {
        let released = self.release.notified();
        self.entered.fetch_add(1, Ordering::SeqCst);
        released.await;
        Ok(Some(ProxyResult::success()))
    }

    fn settings(&self) -> HandlerSettings {
        HandlerSettings {
            command_pool_sizes: [("gate".to_string(), 2)].into_iter().collect(),
            default_timeout_ms: Some(5_000),
            ..HandlerSettings::default()
        }
    }
}

/// Counts calls; cache key is the `key` parameter
#[derive(Debug, Default)]
pub struct CountingHandler {
    pub calls: AtomicUsize,
}

impl CountingHandler {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for CountingHandler {
    fn name(&self) -> &str {
        "counter"
    }

    fn commands(&self) -> Vec<String> {
        vec!["count".to_string()]
    }

    async fn invoke(
        &self,
        _ctx: &InvocationContext,
        _command: &Command,
    ) -> Result<Option<ProxyResult>, HandlerError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(Some(ProxyResult::success().with_message(n.to_string())))
    }

    fn cache_key_fn(&self) -> Option<CacheKeyFn> {
        Some(Arc::new(|params: &BTreeMap<String, String>| {
            params.get("key").cloned()
        }))
    }
}

/// Always fails; optionally its fallback fails too
#[derive(Debug, Default)]
pub struct FailingHandler {
    pub fallback_fails: bool,
}

#[async_trait]
impl Handler for FailingHandler {
    fn name(&self) -> &str {
        "failing"
    }

    fn commands(&self) -> Vec<String> {
        vec!["fail".to_string()]
    }

    async fn invoke(
        &self,
        _ctx: &InvocationContext,
        _command: &Command,
    ) -> Result<Option<ProxyResult>, HandlerError> {
        Err(HandlerError::failed("upstream unavailable"))
    }

    async fn fallback(
        &self,
        _ctx: &InvocationContext,
        _command: &Command,
    ) -> Option<Result<ProxyResult, HandlerError>> {
        Some(if self.fallback_fails {
            Err(HandlerError::failed("fallback unavailable"))
        } else {
            Ok(ProxyResult::success().with_message("cached copy"))
        })
    }
}

/// Blocks its thread with `std::thread::sleep` and never looks at cancellation
#[derive(Debug)]
pub struct BlockingHandler {
    pub name: String,
    pub block: Duration,
    pub isolation: IsolationStrategy,
    pub with_fallback: bool,
    pub finished: AtomicUsize,
}

impl BlockingHandler {
    pub fn new(name: &str, block: Duration) -> Self {
        Self {
            name: name.to_string(),
            block,
            isolation: IsolationStrategy::ThreadPool,
            with_fallback: false,
            finished: AtomicUsize::new(0),
        }
    }

    pub fn with_isolation(mut self, isolation: IsolationStrategy) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_fallback(mut self) -> Self {
        self.with_fallback = true;
        self
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for BlockingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn commands(&self) -> Vec<String> {
        vec![self.name.clone()]
    }

    async fn invoke(
        &self,
        _ctx: &InvocationContext,
        _command: &Command,
    ) -> Result<Option<ProxyResult>, HandlerError> {
        std::thread::sleep(self.block);
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(Some(ProxyResult::success().with_message("late")))
    }

    async fn fallback(
        &self,
        _ctx: &InvocationContext,
        _command: &Command,
    ) -> Option<Result<ProxyResult, HandlerError>> {
        self.with_fallback
            .then(|| Ok(ProxyResult::success().with_message("fallback")))
    }

    fn isolation_strategy(&self) -> IsolationStrategy {
        self.isolation
    }

    fn settings(&self) -> HandlerSettings {
        HandlerSettings {
            default_timeout_ms: Some(50),
            ..HandlerSettings::default()
        }
    }
}
