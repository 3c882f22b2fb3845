//! # Bulkheads
//!
//! Per-pool concurrency isolation. A [`ThreadPoolBulkhead`] runs work on its own worker
//! threads with at most `max_concurrency` running and `queue_capacity` waiting; anything
//! beyond that is rejected without waiting. A [`SemaphoreBulkhead`] hands out permits for
//! work that runs on the caller's own task.
//!
//! Bulkheads are created lazily on first use and are never resized. Those belonging to a
//! replaced handler generation are retired once a newer generation runs on the same pool.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::registry::IsolationStrategy;

/// The bulkhead had no room for the call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Bulkhead '{pool}' is saturated")]
pub struct BulkheadRejected {
    pub pool: String,
}

#[derive(Debug, Default)]
struct BulkheadCounters {
    active: AtomicUsize,
    queued: AtomicUsize,
    rejected: AtomicU64,
    completed: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
enum Gauge {
    Active,
    Queued,
}

impl BulkheadCounters {
    fn gauge(&self, gauge: Gauge) -> &AtomicUsize {
        match gauge {
            Gauge::Active => &self.active,
            Gauge::Queued => &self.queued,
        }
    }
}

/// Increments a gauge for as long as it is alive
#[derive(Debug)]
struct GaugeGuard {
    counters: Arc<BulkheadCounters>,
    gauge: Gauge,
}

impl GaugeGuard {
    fn new(counters: Arc<BulkheadCounters>, gauge: Gauge) -> Self {
        counters.gauge(gauge).fetch_add(1, Ordering::AcqRel);
        Self { counters, gauge }
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.counters.gauge(self.gauge).fetch_sub(1, Ordering::AcqRel);
    }
}

/// Point-in-time view of a bulkhead
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkheadStats {
    pub name: String,
    pub isolation: IsolationStrategy,
    pub max_concurrency: usize,
    pub queue_capacity: usize,
    pub active: usize,
    pub queued: usize,
    pub rejected: u64,
    pub completed: u64,
}

/// Unit of work queued on a [`ThreadPoolBulkhead`]
type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Bounded worker pool: `max_concurrency` dedicated threads, `queue_capacity` waiting in FIFO order
///
/// Each worker thread drives its own current-thread runtime and runs one job at a time, so a
/// handler that blocks its thread only ever stalls its own worker. Dropping the bulkhead
/// closes the queue; workers finish what was already queued and then exit.
#[derive(Debug)]
pub struct ThreadPoolBulkhead {
    name: String,
    max_concurrency: usize,
    queue_capacity: usize,
    admission: Arc<Semaphore>,
    jobs: mpsc::UnboundedSender<Job>,
    counters: Arc<BulkheadCounters>,
}

impl ThreadPoolBulkhead {
    /// Start the pool's worker threads, named `<pool>-worker-<n>`
    pub fn new(
        name: impl Into<String>,
        max_concurrency: usize,
        queue_capacity: usize,
    ) -> std::io::Result<Self> {
        let name = name.into();
        let max_concurrency = max_concurrency.max(1);
        let (jobs, receiver) = mpsc::unbounded_channel::<Job>();
        let receiver = Arc::new(AsyncMutex::new(receiver));

        for index in 0..max_concurrency {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let receiver = receiver.clone();
            let pool = name.clone();
            std::thread::Builder::new()
                .name(format!("{name}-worker-{index}"))
                .spawn(move || runtime.block_on(run_worker(pool, receiver)))?;
        }

        Ok(Self {
            name,
            max_concurrency,
            queue_capacity,
            admission: Arc::new(Semaphore::new(max_concurrency + queue_capacity)),
            jobs,
            counters: Arc::new(BulkheadCounters::default()),
        })
    }

    /// Queue `task` for a worker, or reject immediately if pool and queue are full
    ///
    /// The receiver yields the task's output. It reports an error only if the task panicked
    /// or the workers were gone before it ran. Admission is released before the output is
    /// sent, so a caller that has seen the output can be admitted again.
    pub fn submit<F>(&self, task: F) -> Result<oneshot::Receiver<F::Output>, BulkheadRejected>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let admitted = match self.admission.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return Err(self.reject()),
        };

        let queued = GaugeGuard::new(self.counters.clone(), Gauge::Queued);
        let counters = self.counters.clone();
        let (output_tx, output_rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            drop(queued);
            let active = GaugeGuard::new(counters.clone(), Gauge::Active);
            let output = task.await;
            drop(active);

            counters.completed.fetch_add(1, Ordering::AcqRel);
            drop(admitted);
            // Nobody is listening once the caller's deadline has passed.
            let _ = output_tx.send(output);
        });

        if self.jobs.send(job).is_err() {
            return Err(self.reject());
        }
        Ok(output_rx)
    }

    fn reject(&self) -> BulkheadRejected {
        self.counters.rejected.fetch_add(1, Ordering::AcqRel);
        BulkheadRejected {
            pool: self.name.clone(),
        }
    }

    pub fn stats(&self) -> BulkheadStats {
        BulkheadStats {
            name: self.name.clone(),
            isolation: IsolationStrategy::ThreadPool,
            max_concurrency: self.max_concurrency,
            queue_capacity: self.queue_capacity,
            active: self.counters.active.load(Ordering::Acquire),
            queued: self.counters.queued.load(Ordering::Acquire),
            rejected: self.counters.rejected.load(Ordering::Acquire),
            completed: self.counters.completed.load(Ordering::Acquire),
        }
    }
}

async fn run_worker(pool: String, jobs: Arc<AsyncMutex<mpsc::UnboundedReceiver<Job>>>) {
    loop {
        let next = jobs.lock().await.recv().await;
        let Some(job) = next else {
            break;
        };
        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            warn!(pool = %pool, "Bulkhead job panicked; worker continues");
        }
    }
    debug!(pool = %pool, "Bulkhead worker exiting");
}

/// Counting semaphore for work that stays on the caller's task
#[derive(Debug)]
pub struct SemaphoreBulkhead {
    name: String,
    max_concurrency: usize,
    acquire_timeout: Duration,
    permits: Arc<Semaphore>,
    counters: Arc<BulkheadCounters>,
}

/// Held while semaphore-isolated work runs
#[derive(Debug)]
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
    _active: GaugeGuard,
    counters: Arc<BulkheadCounters>,
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        self.counters.completed.fetch_add(1, Ordering::AcqRel);
    }
}

impl SemaphoreBulkhead {
    pub fn new(name: impl Into<String>, max_concurrency: usize, acquire_timeout: Duration) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            name: name.into(),
            max_concurrency,
            acquire_timeout,
            permits: Arc::new(Semaphore::new(max_concurrency)),
            counters: Arc::new(BulkheadCounters::default()),
        }
    }

    /// Take a permit, waiting at most the configured acquire timeout (zero: no wait)
    pub async fn acquire(&self) -> Result<BulkheadPermit, BulkheadRejected> {
        let permit = if self.acquire_timeout.is_zero() {
            self.permits.clone().try_acquire_owned().ok()
        } else {
            tokio::time::timeout(self.acquire_timeout, self.permits.clone().acquire_owned())
                .await
                .ok()
                .and_then(Result::ok)
        };

        match permit {
            Some(permit) => Ok(BulkheadPermit {
                _permit: permit,
                _active: GaugeGuard::new(self.counters.clone(), Gauge::Active),
                counters: self.counters.clone(),
            }),
            None => {
                self.counters.rejected.fetch_add(1, Ordering::AcqRel);
                Err(BulkheadRejected {
                    pool: self.name.clone(),
                })
            }
        }
    }

    pub fn stats(&self) -> BulkheadStats {
        BulkheadStats {
            name: self.name.clone(),
            isolation: IsolationStrategy::Semaphore,
            max_concurrency: self.max_concurrency,
            queue_capacity: 0,
            active: self.counters.active.load(Ordering::Acquire),
            queued: 0,
            rejected: self.counters.rejected.load(Ordering::Acquire),
            completed: self.counters.completed.load(Ordering::Acquire),
        }
    }
}

/// Registry key for `pool` as served by handler `generation`
///
/// Generation zero uses the bare pool name; replacements get `<pool>.<generation>` so they
/// start on fresh bulkheads sized from their own settings.
pub fn bulkhead_key(pool: &str, generation: u64) -> String {
    match generation {
        0 => pool.to_string(),
        generation => format!("{pool}.{generation}"),
    }
}

/// Process-wide bulkheads keyed by pool (or versioned pool) name
#[derive(Debug, Default)]
pub struct BulkheadRegistry {
    thread_pools: DashMap<String, Arc<ThreadPoolBulkhead>>,
    semaphores: DashMap<String, Arc<SemaphoreBulkhead>>,
    /// Newest handler generation seen per pool
    generations: DashMap<String, u64>,
}

impl BulkheadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn thread_pool(
        &self,
        key: &str,
        max_concurrency: usize,
        queue_capacity: usize,
    ) -> std::io::Result<Arc<ThreadPoolBulkhead>> {
        if let Some(existing) = self.thread_pools.get(key) {
            if existing.max_concurrency != max_concurrency.max(1)
                || existing.queue_capacity != queue_capacity
            {
                warn!(
                    pool = %key,
                    current_size = existing.max_concurrency,
                    requested_size = max_concurrency,
                    current_queue = existing.queue_capacity,
                    requested_queue = queue_capacity,
                    "Bulkhead already exists with a different size; bulkheads are never resized"
                );
            }
            return Ok(existing.clone());
        }

        match self.thread_pools.entry(key.to_string()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let bulkhead = Arc::new(ThreadPoolBulkhead::new(key, max_concurrency, queue_capacity)?);
                info!(
                    pool = %key,
                    max_concurrency = max_concurrency,
                    queue_capacity = queue_capacity,
                    "🧱 Thread-pool bulkhead created"
                );
                Ok(Arc::clone(entry.insert(bulkhead).value()))
            }
        }
    }

    /// Record that `pool` is served by `generation` and drop bulkheads of older generations
    ///
    /// Calls already holding a retired bulkhead keep it alive until they finish; its worker
    /// threads exit once their queue drains. Returns how many bulkheads were retired.
    pub fn retire_superseded(&self, pool: &str, generation: u64) -> usize {
        if self
            .generations
            .get(pool)
            .is_some_and(|current| *current >= generation)
        {
            return 0;
        }

        let previous = match self.generations.entry(pool.to_string()) {
            Entry::Occupied(mut entry) if *entry.get() < generation => entry.insert(generation),
            Entry::Occupied(_) => return 0,
            Entry::Vacant(entry) => {
                entry.insert(generation);
                return 0;
            }
        };

        let mut retired = 0;
        for stale in previous..generation {
            let key = bulkhead_key(pool, stale);
            retired += usize::from(self.thread_pools.remove(&key).is_some());
            retired += usize::from(self.semaphores.remove(&key).is_some());
        }
        if retired > 0 {
            info!(
                pool = %pool,
                generation = generation,
                retired = retired,
                "🧹 Retired bulkheads of superseded handler generations"
            );
        }
        retired
    }

    pub fn semaphore(
        &self,
        key: &str,
        max_concurrency: usize,
        acquire_timeout: Duration,
    ) -> Arc<SemaphoreBulkhead> {
        if let Some(existing) = self.semaphores.get(key) {
            if existing.max_concurrency != max_concurrency.max(1) {
                warn!(
                    pool = %key,
                    current_size = existing.max_concurrency,
                    requested_size = max_concurrency,
                    "Bulkhead already exists with a different size; bulkheads are never resized"
                );
            }
            return existing.clone();
        }

        self.semaphores
            .entry(key.to_string())
            .or_insert_with(|| {
                info!(
                    pool = %key,
                    max_concurrency = max_concurrency,
                    "🧱 Semaphore bulkhead created"
                );
                Arc::new(SemaphoreBulkhead::new(key, max_concurrency, acquire_timeout))
            })
            .clone()
    }

    /// Stats for every bulkhead, sorted by name
    pub fn stats(&self) -> Vec<BulkheadStats> {
        let mut stats: Vec<_> = self
            .thread_pools
            .iter()
            .map(|entry| entry.value().stats())
            .chain(self.semaphores.iter().map(|entry| entry.value().stats()))
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}
