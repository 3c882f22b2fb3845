//! # Request-Scoped Cache
//!
//! De-duplicates identical calls made while serving one inbound request. Entries are keyed
//! by request id and then by the handler-supplied cache key, and hold the in-flight or
//! completed execution so concurrent lookups for the same key share one handler call.
//! A request's entries exist only while a [`RequestScope`] for it is open; there is no
//! time-based expiry and nothing is shared across requests.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use super::state::CompletedExecution;
use crate::models::RequestContext;

pub(crate) type CacheSlot = Arc<OnceCell<CompletedExecution>>;

#[derive(Debug, Default)]
struct ScopeEntries {
    /// Open scopes for this request id; nested dispatches share one set of entries
    depth: usize,
    entries: HashMap<String, CacheSlot>,
}

#[derive(Debug, Default)]
pub struct RequestCache {
    scopes: DashMap<String, Arc<Mutex<ScopeEntries>>>,
}

impl RequestCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn open(&self, request_id: &str) {
        // Counted under the shard lock so a concurrent close cannot remove the entry first.
        self.scopes
            .entry(request_id.to_string())
            .or_default()
            .lock()
            .depth += 1;
    }

    pub(crate) fn close(&self, request_id: &str) {
        let now_empty = match self.scopes.get(request_id) {
            Some(scope) => {
                let mut scope = scope.lock();
                scope.depth = scope.depth.saturating_sub(1);
                scope.depth == 0
            }
            None => false,
        };

        if now_empty {
            // Re-checked under the shard lock in case the request was reopened meanwhile.
            if let Some((_, scope)) = self
                .scopes
                .remove_if(request_id, |_, scope| scope.lock().depth == 0)
            {
                debug!(
                    request_id = %request_id,
                    entries = scope.lock().entries.len(),
                    "Request cache cleared"
                );
            }
        }
    }

    /// Slot for `key` within an open request scope; `None` when no scope is open
    pub(crate) fn slot(&self, request_id: &str, key: &str) -> Option<CacheSlot> {
        let scope = self.scopes.get(request_id)?.clone();
        let mut scope = scope.lock();
        Some(scope.entries.entry(key.to_string()).or_default().clone())
    }

    pub fn is_open(&self, request_id: &str) -> bool {
        self.scopes.contains_key(request_id)
    }

    /// Number of cached keys for a request
    pub fn entry_count(&self, request_id: &str) -> usize {
        self.scopes
            .get(request_id)
            .map(|scope| scope.lock().entries.len())
            .unwrap_or(0)
    }

    pub fn open_requests(&self) -> usize {
        self.scopes.len()
    }
}

/// Keeps a request's cache alive; dropping the last scope for a request clears it
#[derive(Debug)]
pub struct RequestScope {
    cache: Arc<RequestCache>,
    request: RequestContext,
}

impl RequestScope {
    pub(crate) fn open(cache: Arc<RequestCache>, request: RequestContext) -> Self {
        cache.open(&request.request_id);
        Self { cache, request }
    }

    pub fn request(&self) -> &RequestContext {
        &self.request
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        self.cache.close(&self.request.request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyResult;

    #[test]
    fn test_no_slot_without_scope() {
        let cache = RequestCache::new();
        assert!(cache.slot("req", "key").is_none());
    }

    #[test]
    fn test_same_key_same_slot() {
        let cache = Arc::new(RequestCache::new());
        let _scope = RequestScope::open(cache.clone(), RequestContext::with_request_id("req"));

        let a = cache.slot("req", "k").unwrap();
        let b = cache.slot("req", "k").unwrap();
        let c = cache.slot("req", "other").unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.entry_count("req"), 2);
    }

    #[test]
    fn test_nested_scopes_clear_on_last_drop() {
        let cache = Arc::new(RequestCache::new());
        let request = RequestContext::with_request_id("req");

        let outer = RequestScope::open(cache.clone(), request.clone());
        let inner = RequestScope::open(cache.clone(), request);
        cache
            .slot("req", "k")
            .unwrap()
            .set(CompletedExecution::succeeded(ProxyResult::success()))
            .unwrap();

        drop(inner);
        assert!(cache.is_open("req"));
        assert_eq!(cache.entry_count("req"), 1);

        drop(outer);
        assert!(!cache.is_open("req"));
        assert_eq!(cache.open_requests(), 0);
    }

    #[test]
    fn test_requests_are_isolated() {
        let cache = Arc::new(RequestCache::new());
        let _a = RequestScope::open(cache.clone(), RequestContext::with_request_id("a"));
        let _b = RequestScope::open(cache.clone(), RequestContext::with_request_id("b"));

        let slot_a = cache.slot("a", "k").unwrap();
        let slot_b = cache.slot("b", "k").unwrap();
        assert!(!Arc::ptr_eq(&slot_a, &slot_b));
    }

    #[test]
    fn test_scope_opened_during_concurrent_close_stays_open() {
        let cache = Arc::new(RequestCache::new());
        let churn = {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for _ in 0..5_000 {
                    drop(RequestScope::open(
                        cache.clone(),
                        RequestContext::with_request_id("req"),
                    ));
                }
            })
        };

        for _ in 0..5_000 {
            let _scope = RequestScope::open(cache.clone(), RequestContext::with_request_id("req"));
            assert!(cache.slot("req", "k").is_some());
        }

        churn.join().unwrap();
        assert_eq!(cache.open_requests(), 0);
    }
}
