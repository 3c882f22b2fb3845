#![allow(dead_code)]

pub mod handlers;
pub mod strategies;

use parking_lot::Mutex;
use std::sync::Arc;

use switchyard_core::adapters::ServiceProxy;
use switchyard_core::config::{EngineConfig, ProxyConfig};
use switchyard_core::events::{EventError, EventSink, ExecutionEvent};

pub use handlers::*;

/// Sink that keeps every event for later assertions
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: ExecutionEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Proxy with default configuration apart from `engine`, recording its events
pub fn proxy_with(engine: EngineConfig) -> (Arc<ServiceProxy>, Arc<RecordingSink>) {
    let config = ProxyConfig {
        engine,
        ..ProxyConfig::default()
    };
    let sink = Arc::new(RecordingSink::default());
    (ServiceProxy::from_config(&config, sink.clone()), sink)
}

pub fn proxy() -> (Arc<ServiceProxy>, Arc<RecordingSink>) {
    proxy_with(EngineConfig::default())
}
