//! # Execution Engine
//!
//! Runs a resolved command under its bulkhead with a deadline, falls back when the
//! primary path fails, de-duplicates calls within a request, and publishes exactly one
//! [`ExecutionEvent`] per call.
//!
//! ```text
//! execute ─┬─ cache hit? ──────────────────────────────┐
//!          └─ run: Created → Running ─ bulkhead ─ timeout ─ settle (fallback) ─┴─ emit
//! ```

use chrono::Utc;
use futures::FutureExt;
use parking_lot::RwLock;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::bulkhead::{BulkheadRegistry, BulkheadStats};
use super::context::{CommandExecutor, InvocationContext};
use super::handle::ExecutionHandle;
use super::request_cache::{RequestCache, RequestScope};
use super::state::{CompletedExecution, ExecutionState, ExecutionTracker};
use super::ExecutionError;
use crate::config::EngineConfig;
use crate::events::{EventSink, ExecutionEvent};
use crate::logging::log_execution_outcome;
use crate::models::{Command, ProxyResult, RequestContext};
use crate::registry::{Handler, Isolation, Resolution};

pub struct ExecutionEngine {
    config: EngineConfig,
    bulkheads: BulkheadRegistry,
    request_cache: Arc<RequestCache>,
    sink: Arc<dyn EventSink>,
    executor: RwLock<Option<Weak<dyn CommandExecutor>>>,
    runtime: Option<Handle>,
}

impl ExecutionEngine {
    /// Create an engine publishing to `sink`
    ///
    /// When called inside a tokio runtime, that runtime is captured for
    /// [`Self::execute_blocking`] and [`Self::queue`]; otherwise attach one with
    /// [`Self::with_runtime`].
    pub fn new(config: EngineConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            bulkheads: BulkheadRegistry::new(),
            request_cache: Arc::new(RequestCache::new()),
            sink,
            executor: RwLock::new(None),
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Executor made available to handlers for nested commands
    pub fn attach_executor(&self, executor: Weak<dyn CommandExecutor>) {
        *self.executor.write() = Some(executor);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open a request-cache scope; cached results for the request live until it is dropped
    pub fn begin_request(&self, request: RequestContext) -> RequestScope {
        RequestScope::open(self.request_cache.clone(), request)
    }

    pub fn request_cache(&self) -> &RequestCache {
        &self.request_cache
    }

    pub fn bulkhead_stats(&self) -> Vec<BulkheadStats> {
        self.bulkheads.stats()
    }

    /// Run a command to a terminal state and return its result or root-cause error
    pub async fn execute(
        &self,
        resolution: &Resolution,
        command: Command,
        request: RequestContext,
    ) -> Result<ProxyResult, ExecutionError> {
        let started = Instant::now();
        let command = Arc::new(command);

        let slot = resolution
            .policy
            .cache_key(&command.params)
            // Keys are scoped per command so sibling commands of one handler never collide.
            .and_then(|key| {
                self.request_cache
                    .slot(&request.request_id, &format!("{}/{key}", command.name))
            });

        let (completed, cached) = match slot {
            Some(slot) => {
                let ran = AtomicBool::new(false);
                let completed = slot
                    .get_or_init(|| async {
                        ran.store(true, Ordering::Release);
                        self.run(resolution, &command, &request).await
                    })
                    .await
                    .clone();
                (completed, !ran.load(Ordering::Acquire))
            }
            None => (self.run(resolution, &command, &request).await, false),
        };

        self.emit(resolution, &command, &request, &completed, cached, started.elapsed());
        completed.result
    }

    /// Blocking variant of [`Self::execute`] for callers outside the async runtime
    ///
    /// Returns [`ExecutionError::Unavailable`] when called from within a runtime, where
    /// blocking would stall a shared worker.
    pub fn execute_blocking(
        &self,
        resolution: &Resolution,
        command: Command,
        request: RequestContext,
    ) -> Result<ProxyResult, ExecutionError> {
        if Handle::try_current().is_ok() {
            return Err(ExecutionError::Unavailable(
                "execute_blocking called from inside an async runtime; use execute".to_string(),
            ));
        }
        let runtime = self.runtime.as_ref().ok_or_else(|| {
            ExecutionError::Unavailable("no tokio runtime attached to the engine".to_string())
        })?;
        runtime.block_on(self.execute(resolution, command, request))
    }

    /// Start the execution in the background and return its handle immediately
    pub fn queue(
        self: &Arc<Self>,
        resolution: Resolution,
        command: Command,
        request: RequestContext,
    ) -> ExecutionHandle {
        let request_id = request.request_id.clone();
        let runtime = match Handle::try_current().ok().or_else(|| self.runtime.clone()) {
            Some(runtime) => runtime,
            None => {
                return ExecutionHandle::failed(
                    request_id,
                    ExecutionError::Unavailable("no tokio runtime available to queue on".to_string()),
                )
            }
        };

        let engine = Arc::clone(self);
        let join = runtime.spawn(async move { engine.execute(&resolution, command, request).await });
        ExecutionHandle::pending(request_id, join)
    }

    fn executor(&self) -> Option<Arc<dyn CommandExecutor>> {
        self.executor.read().as_ref().and_then(Weak::upgrade)
    }

    async fn run(
        &self,
        resolution: &Resolution,
        command: &Arc<Command>,
        request: &RequestContext,
    ) -> CompletedExecution {
        let tracker = ExecutionTracker::new();
        let cancellation = CancellationToken::new();
        let ctx = InvocationContext::new(request.clone(), resolution.pool_name.clone())
            .with_cancellation(cancellation.clone())
            .with_executor(self.executor());

        let dispatched = tracker.start();
        debug_assert!(dispatched, "fresh tracker refused to start");
        let primary = if resolution.handler.is_active() {
            self.dispatch(resolution, command, ctx, &cancellation).await
        } else {
            Err(ExecutionError::HandlerInactive {
                handler: resolution.handler.name().to_string(),
            })
        };

        let completed = self.settle(resolution, command, request, primary).await;
        if !tracker.finish(completed.state) {
            error!(
                command = %command.name,
                pool = %resolution.pool_name,
                outcome = %completed.state,
                recorded = %tracker.state(),
                "Execution reached a second terminal state"
            );
        }
        completed
    }

    /// The single point where isolation strategies diverge
    async fn dispatch(
        &self,
        resolution: &Resolution,
        command: &Arc<Command>,
        ctx: InvocationContext,
        cancellation: &CancellationToken,
    ) -> Result<ProxyResult, ExecutionError> {
        let policy = &resolution.policy;
        let timed_out = || {
            cancellation.cancel();
            ExecutionError::TimedOut {
                command: command.name.clone(),
                timeout_ms: duration_ms(policy.timeout),
            }
        };
        let rejected = || ExecutionError::Rejected {
            pool: resolution.pool_name.clone(),
        };

        self.bulkheads
            .retire_superseded(&resolution.pool_name, resolution.handler.generation());

        match policy.isolation {
            Isolation::ThreadPool { queue_capacity } => {
                let bulkhead = self
                    .bulkheads
                    .thread_pool(&policy.bulkhead_key, policy.max_concurrency, queue_capacity)
                    .map_err(|e| {
                        ExecutionError::Unavailable(format!(
                            "could not start workers for pool '{}': {e}",
                            resolution.pool_name
                        ))
                    })?;
                let registered = resolution.handler.clone();
                let task_command = command.clone();
                let submitted = bulkhead.submit(async move {
                    AssertUnwindSafe(invoke_handler(
                        registered.handler().as_ref(),
                        &ctx,
                        &task_command,
                    ))
                    .catch_unwind()
                    .await
                });

                let output = match submitted {
                    Ok(output) => output,
                    Err(_) => return Err(rejected()),
                };

                // On timeout the job is abandoned: it may finish, but nobody reads its result.
                match within_deadline(policy.timeout, output).await {
                    None => Err(timed_out()),
                    Some(Err(_)) => Err(rejected()),
                    Some(Ok(Err(panic))) => Err(handler_panicked(panic.as_ref())),
                    Some(Ok(Ok(outcome))) => outcome,
                }
            }
            Isolation::Semaphore { acquire_timeout } => {
                let bulkhead = self.bulkheads.semaphore(
                    &policy.bulkhead_key,
                    policy.max_concurrency,
                    acquire_timeout,
                );
                let _permit = bulkhead.acquire().await.map_err(|_| rejected())?;

                let invocation =
                    AssertUnwindSafe(invoke_handler(resolution.handler.handler().as_ref(), &ctx, command))
                        .catch_unwind();
                match within_deadline(policy.timeout, invocation).await {
                    None => Err(timed_out()),
                    Some(Err(panic)) => Err(handler_panicked(panic.as_ref())),
                    Some(Ok(outcome)) => outcome,
                }
            }
        }
    }

    /// Map the primary outcome to a terminal state, running the fallback where allowed
    async fn settle(
        &self,
        resolution: &Resolution,
        command: &Command,
        request: &RequestContext,
        primary: Result<ProxyResult, ExecutionError>,
    ) -> CompletedExecution {
        let error = match primary {
            Ok(result) => return CompletedExecution::succeeded(result),
            Err(error) => error,
        };

        let failed_state = match &error {
            ExecutionError::Rejected { .. } => ExecutionState::Rejected,
            ExecutionError::TimedOut { .. } => ExecutionState::TimedOut,
            _ => ExecutionState::FailedNoFallback,
        };
        let failed = |fallback_failed: bool, error: ExecutionError| CompletedExecution {
            state: failed_state,
            fell_back: false,
            fallback_failed,
            result: Err(error),
        };

        let fallback_allowed = resolution.policy.fallback_enabled
            && !matches!(error, ExecutionError::HandlerInactive { .. });
        if !fallback_allowed {
            return failed(false, error);
        }

        // Fresh context: the primary's token may already be cancelled.
        let ctx = InvocationContext::new(request.clone(), resolution.pool_name.clone())
            .with_executor(self.executor());
        let fallback = AssertUnwindSafe(resolution.handler.handler().fallback(&ctx, command))
            .catch_unwind()
            .await;

        match fallback {
            Ok(None) => failed(false, error),
            Ok(Some(Ok(result))) => {
                debug!(
                    command = %command.name,
                    pool = %resolution.pool_name,
                    cause = %error,
                    "Fallback supplied the result"
                );
                CompletedExecution {
                    state: match failed_state {
                        ExecutionState::FailedNoFallback => ExecutionState::FailedFallback,
                        other => other,
                    },
                    fell_back: true,
                    fallback_failed: false,
                    result: Ok(result),
                }
            }
            Ok(Some(Err(fallback_error))) => {
                warn!(
                    command = %command.name,
                    pool = %resolution.pool_name,
                    cause = %error,
                    fallback_error = %fallback_error,
                    "Fallback failed; returning the original error"
                );
                failed(true, error)
            }
            Err(panic) => {
                warn!(
                    command = %command.name,
                    pool = %resolution.pool_name,
                    cause = %error,
                    fallback_error = %panic_message(panic.as_ref()),
                    "Fallback panicked; returning the original error"
                );
                failed(true, error)
            }
        }
    }

    fn emit(
        &self,
        resolution: &Resolution,
        command: &Command,
        request: &RequestContext,
        completed: &CompletedExecution,
        cached: bool,
        elapsed: Duration,
    ) {
        let event = ExecutionEvent {
            command_name: command.name.clone(),
            pool_name: resolution.pool_name.clone(),
            outcome: completed.state,
            fell_back: completed.fell_back,
            fallback_failed: completed.fallback_failed,
            cached,
            elapsed_ms: duration_ms(elapsed),
            handler_type: resolution.handler.type_name().to_string(),
            request_id: request.request_id.clone(),
            error: completed.result.as_ref().err().map(ToString::to_string),
            occurred_at: Utc::now(),
        };
        log_execution_outcome(&event);

        // A misbehaving sink must never change what the caller gets back.
        match std::panic::catch_unwind(AssertUnwindSafe(|| self.sink.publish(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                command = %command.name,
                error = %e,
                "Failed to publish execution event"
            ),
            Err(panic) => warn!(
                command = %command.name,
                error = %panic_message(panic.as_ref()),
                "Execution event sink panicked"
            ),
        }
    }
}

async fn invoke_handler(
    handler: &dyn Handler,
    ctx: &InvocationContext,
    command: &Command,
) -> Result<ProxyResult, ExecutionError> {
    match handler.invoke(ctx, command).await {
        Ok(None) => Ok(ProxyResult::no_result()),
        Ok(Some(result)) if result.success => Ok(result),
        Ok(Some(result)) => Err(ExecutionError::HandlerFailure(format!(
            "Command returned FALSE: {}",
            result.message.as_deref().unwrap_or_default()
        ))),
        Err(e) => Err(ExecutionError::HandlerFailure(e.to_string())),
    }
}

/// Output of `work` if it completes before `timeout` elapses
///
/// Work that only yields after the deadline (a handler blocking its thread, say) still
/// counts as timed out; its late output is discarded.
async fn within_deadline<F: Future>(timeout: Duration, work: F) -> Option<F::Output> {
    let deadline = tokio::time::Instant::now() + timeout;
    tokio::select! {
        biased;
        _ = tokio::time::sleep_until(deadline) => None,
        output = work => (tokio::time::Instant::now() < deadline).then_some(output),
    }
}

fn handler_panicked(panic: &(dyn std::any::Any + Send)) -> ExecutionError {
    ExecutionError::HandlerFailure(format!("handler panicked: {}", panic_message(panic)))
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
