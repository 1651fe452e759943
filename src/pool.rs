use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Snapshot of a worker pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    /// Total number of worker slots.
    pub capacity: usize,
    /// Units currently executing.
    pub active: usize,
    /// Units waiting for a slot.
    pub queued: usize,
    /// Free slots.
    pub available: usize,
}

/// A fixed-size worker pool backed by a tokio semaphore.
///
/// Every work unit of an iteration is spawned up front; at most `capacity`
/// of them execute at once and the rest wait for a slot. A panic inside a
/// unit surfaces as a `JoinError` on its handle and never reaches the pool.
#[derive(Clone)]
pub struct Pool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    active: Arc<AtomicUsize>,
    queued: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl Pool {
    /// Create a pool with `workers` slots. Zero means one slot per CPU core.
    #[cfg(test)]
    pub fn new(workers: usize) -> Self {
        Self::with_cancel(workers, CancellationToken::new())
    }

    /// Create a pool whose units observe an existing cancellation token.
    pub fn with_cancel(workers: usize, cancel: CancellationToken) -> Self {
        let capacity = if workers == 0 {
            num_cpus::get().max(1)
        } else {
            workers
        };
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            active: Arc::new(AtomicUsize::new(0)),
            queued: Arc::new(AtomicUsize::new(0)),
            cancel,
        }
    }

    /// Spawn a task that runs once a slot is free.
    pub fn spawn<F, T>(&self, task: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        let active = self.active.clone();
        let queued = self.queued.clone();

        tokio::spawn(async move {
            queued.fetch_add(1, Ordering::SeqCst);
            // The semaphore is never closed, so acquiring only waits.
            let permit = semaphore.acquire_owned().await;
            queued.fetch_sub(1, Ordering::SeqCst);
            active.fetch_add(1, Ordering::SeqCst);

            let _guard = ActiveGuard(active);
            let result = task.await;
            drop(permit);
            result
        })
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity,
            active: self.active.load(Ordering::SeqCst),
            queued: self.queued.load(Ordering::SeqCst),
            available: self.semaphore.available_permits(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Decrements the active count even when the task panics.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn pool_respects_capacity() {
        let pool = Pool::new(2);
        assert_eq!(pool.capacity(), 2);

        let stats = pool.stats();
        assert_eq!(stats.capacity, 2);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.available, 2);
    }

    #[tokio::test]
    async fn pool_never_exceeds_capacity() {
        let pool = Pool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                pool.spawn(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.stats().active, 0);
    }

    #[tokio::test]
    async fn pool_returns_task_result() {
        let pool = Pool::new(2);
        let result = pool.spawn(async { 42 }).await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn panicking_task_releases_its_slot() {
        let pool = Pool::new(1);
        let handle = pool.spawn(async { panic!("unit blew up") });
        assert!(handle.await.unwrap_err().is_panic());

        let result = pool.spawn(async { "after" }).await.unwrap();
        assert_eq!(result, "after");
        assert_eq!(pool.stats().active, 0);
    }

    #[tokio::test]
    async fn pool_default_uses_cpu_count() {
        let pool = Pool::new(0);
        assert!(pool.capacity() >= 1);
    }

    #[tokio::test]
    async fn pool_shares_cancellation_token() {
        let token = CancellationToken::new();
        let pool = Pool::with_cancel(2, token.clone());

        assert!(!pool.is_cancelled());
        token.cancel();
        assert!(pool.is_cancelled());
    }
}
