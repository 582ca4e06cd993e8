//! Bounded worker pool.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tracing::Instrument;

/// Runs engine work units with at most `size` of them executing at once.
///
/// Submitting never blocks: the unit is spawned immediately and waits for a
/// permit inside the task. Units still waiting on a delay or a permit count
/// as in flight, so [`WorkerPool::wait_idle`] only returns once the engine
/// has nothing left to do. Timers scheduled with
/// [`WorkerPool::schedule_timer`] are not counted.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    size: usize,
    permits: Arc<Semaphore>,
    in_flight: AtomicUsize,
    idle: Notify,
}

struct InFlightGuard {
    inner: Arc<PoolInner>,
}

impl InFlightGuard {
    fn new(inner: &Arc<PoolInner>) -> Self {
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            inner: Arc::clone(inner),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

impl WorkerPool {
    /// Creates a pool running up to `size` units concurrently.
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                size,
                permits: Arc::new(Semaphore::new(size)),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Maximum number of concurrently executing units.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Units submitted and not yet finished.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Submits a unit of work.
    pub fn submit<F>(&self, name: &'static str, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.submit_after(name, Duration::ZERO, work);
    }

    /// Submits a unit of work that starts after `delay`.
    pub fn submit_after<F>(&self, name: &'static str, delay: Duration, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = InFlightGuard::new(&self.inner);
        let permits = Arc::clone(&self.inner.permits);
        let span = tracing::debug_span!("unit", name);
        tokio::spawn(
            async move {
                let _guard = guard;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let Ok(_permit) = permits.acquire_owned().await else {
                    tracing::warn!(name, "Worker pool closed; dropping unit");
                    return;
                };
                work.await;
            }
            .instrument(span),
        );
    }

    /// Runs `work` after `delay` without counting it as in flight.
    ///
    /// Used for timeouts that normally become no-ops; `work` should submit
    /// real work back to the pool.
    pub fn schedule_timer<F>(&self, delay: Duration, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            work();
        });
    }

    /// Resolves once no unit is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
