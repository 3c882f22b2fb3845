//! # Execution Policy
//!
//! The resolved, per-call description of how a command runs: which bulkhead, how many
//! concurrent calls, how long before abandonment, and whether fallback and request
//! caching apply. A policy is derived once per resolve and read by the engine through a
//! single match on [`Isolation`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Derives a request-cache key from command parameters; `None` disables caching for the call
pub type CacheKeyFn = Arc<dyn Fn(&BTreeMap<String, String>) -> Option<String> + Send + Sync>;

/// Isolation strategy a handler declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationStrategy {
    /// Dedicated bounded worker pool per pool name
    #[default]
    ThreadPool,
    /// Counting semaphore guarding execution on the caller's task
    Semaphore,
}

impl fmt::Display for IsolationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ThreadPool => write!(f, "thread_pool"),
            Self::Semaphore => write!(f, "semaphore"),
        }
    }
}

impl FromStr for IsolationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "thread_pool" | "threadpool" | "thread" => Ok(Self::ThreadPool),
            "semaphore" => Ok(Self::Semaphore),
            _ => Err(format!("Invalid isolation strategy: {s}")),
        }
    }
}

/// Whether the command adapter waits for a command's result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationMode {
    #[default]
    Sync,
    /// Dispatched fire-and-forget; the caller is answered immediately
    Async,
}

/// Isolation resolved with its strategy-specific parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    ThreadPool { queue_capacity: usize },
    Semaphore { acquire_timeout: Duration },
}

impl Isolation {
    pub fn strategy(&self) -> IsolationStrategy {
        match self {
            Self::ThreadPool { .. } => IsolationStrategy::ThreadPool,
            Self::Semaphore { .. } => IsolationStrategy::Semaphore,
        }
    }
}

#[derive(Clone)]
pub struct ExecutionPolicy {
    pub isolation: Isolation,
    /// Sanitised pool name the command runs under (metric and event key)
    pub pool_name: String,
    /// Bulkhead identity; differs from `pool_name` once a handler has been hot-reloaded
    pub bulkhead_key: String,
    pub max_concurrency: usize,
    pub timeout: Duration,
    pub fallback_enabled: bool,
    pub cache_key_fn: Option<CacheKeyFn>,
    pub invocation: InvocationMode,
}

impl ExecutionPolicy {
    pub fn cache_key(&self, params: &BTreeMap<String, String>) -> Option<String> {
        self.cache_key_fn.as_ref().and_then(|key_fn| key_fn(params))
    }
}

impl fmt::Debug for ExecutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionPolicy")
            .field("isolation", &self.isolation)
            .field("pool_name", &self.pool_name)
            .field("bulkhead_key", &self.bulkhead_key)
            .field("max_concurrency", &self.max_concurrency)
            .field("timeout", &self.timeout)
            .field("fallback_enabled", &self.fallback_enabled)
            .field("cacheable", &self.cache_key_fn.is_some())
            .field("invocation", &self.invocation)
            .finish()
    }
}
