use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

use super::ExecutionError;
use crate::models::ProxyResult;

enum HandleState {
    Pending(JoinHandle<Result<ProxyResult, ExecutionError>>),
    Ready(Option<Result<ProxyResult, ExecutionError>>),
}

/// Completion handle for a queued execution
///
/// Await it from async code or call [`ExecutionHandle::wait_blocking`] from a plain
/// thread. Dropping the handle does not stop the execution.
pub struct ExecutionHandle {
    request_id: String,
    state: HandleState,
}

impl ExecutionHandle {
    pub(crate) fn pending(
        request_id: String,
        join: JoinHandle<Result<ProxyResult, ExecutionError>>,
    ) -> Self {
        Self {
            request_id,
            state: HandleState::Pending(join),
        }
    }

    pub(crate) fn failed(request_id: String, error: ExecutionError) -> Self {
        Self {
            request_id,
            state: HandleState::Ready(Some(Err(error))),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            HandleState::Pending(join) => join.is_finished(),
            HandleState::Ready(_) => true,
        }
    }

    /// Block the current thread until the execution completes
    ///
    /// Must not be called from inside an async runtime worker.
    pub fn wait_blocking(self) -> Result<ProxyResult, ExecutionError> {
        futures::executor::block_on(self)
    }
}

impl Future for ExecutionHandle {
    type Output = Result<ProxyResult, ExecutionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            HandleState::Pending(join) => Pin::new(join).poll(cx).map(|joined| {
                joined.unwrap_or_else(|e| {
                    Err(ExecutionError::HandlerFailure(format!(
                        "queued execution did not complete: {e}"
                    )))
                })
            }),
            HandleState::Ready(result) => Poll::Ready(result.take().unwrap_or_else(|| {
                Err(ExecutionError::Unavailable(
                    "execution handle polled after completion".to_string(),
                ))
            })),
        }
    }
}

impl std::fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("request_id", &self.request_id)
            .field("finished", &self.is_finished())
            .finish()
    }
}
