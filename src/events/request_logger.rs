use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{EventPublisher, ExecutionEvent};
use crate::logging::log_execution_outcome;

/// Subscriber that writes every execution event to the structured log
///
/// The loop ends when the publisher is dropped or the returned task is aborted.
#[derive(Debug)]
pub struct RequestLogger {
    receiver: broadcast::Receiver<ExecutionEvent>,
}

impl RequestLogger {
    pub fn new(publisher: &EventPublisher) -> Self {
        Self {
            receiver: publisher.subscribe(),
        }
    }

    pub fn spawn(self) -> JoinHandle<u64> {
        tokio::spawn(self.run())
    }

    /// Consume events until the channel closes; returns the number logged
    pub async fn run(mut self) -> u64 {
        let mut logged = 0u64;
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    log_execution_outcome(&event);
                    logged += 1;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "📉 Request logger lagged; events dropped");
                }
                Err(RecvError::Closed) => {
                    debug!(logged = logged, "Request logger stopping: event channel closed");
                    return logged;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{sample_event, EventSink};
    use crate::execution::ExecutionState;

    #[tokio::test]
    async fn test_logs_until_publisher_dropped() {
        let publisher = EventPublisher::new(16);
        let task = RequestLogger::new(&publisher).spawn();

        publisher
            .publish(sample_event("ping", ExecutionState::Succeeded))
            .unwrap();
        publisher
            .publish(sample_event("ping", ExecutionState::TimedOut))
            .unwrap();
        drop(publisher);

        assert_eq!(task.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_survives_lag() {
        let publisher = EventPublisher::new(1);
        let logger = RequestLogger::new(&publisher);

        for _ in 0..4 {
            publisher
                .publish(sample_event("ping", ExecutionState::Succeeded))
                .unwrap();
        }
        drop(publisher);

        assert_eq!(logger.run().await, 1);
    }
}
