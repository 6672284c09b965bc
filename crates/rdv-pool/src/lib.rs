//! A bounded worker pool: caps the number of connection jobs serviced
//! concurrently, with retry/backoff on overload instead of unbounded
//! fan-out.
//!
//! A semaphore-gated spawner over a [`tokio::task::JoinSet`] stands in for
//! a goroutine pool: a fixed number of permits bounds concurrency, and
//! `submit`/`try_submit`/`submit_with_retry` give callers a choice of
//! backpressure policy when the pool is saturated.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::warn;

/// Construction parameters for a [`WorkerPool`].
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Hard cap on simultaneously executing jobs.
    pub size: usize,
    /// Idle-worker expiry. Async workers are just permits, not long-lived
    /// threads, so this has no effect on the pool's own resources; it is
    /// kept for configuration-surface parity with `server.expiry_duration`
    /// and is available to callers that want to expire their own
    /// idle per-connection state on the same cadence.
    pub idle_expiry: Duration,
    /// Upper bound on jobs waiting for a worker (`try_submit`'s queue
    /// depth bound).
    pub max_blocking: usize,
    /// Whether to eagerly size the internal task-tracking structure.
    pub pre_alloc: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 64,
            idle_expiry: Duration::from_secs(60),
            max_blocking: 128,
            pre_alloc: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool overloaded: queue already at {waiting}/{max}")]
    Overloaded { waiting: usize, max: usize },
    #[error("worker pool has been released")]
    Released,
}

/// A bounded set of execution contexts consuming jobs under a hard
/// concurrency cap.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    waiters: AtomicUsize,
    max_blocking: usize,
    tasks: Mutex<JoinSet<()>>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        // `pre_alloc` has no analog for a JoinSet (it has no capacity to
        // reserve); the field is retained purely for configuration-surface
        // parity with the original pool's construction parameters.
        let _ = config.pre_alloc;
        Self {
            semaphore: Arc::new(Semaphore::new(config.size)),
            waiters: AtomicUsize::new(0),
            max_blocking: config.max_blocking,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Dispatch `job`, blocking until a worker frees regardless of
    /// `max_blocking`. This is the default submission mode.
    pub async fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let permit = self.semaphore.clone().acquire_owned().await;
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        let permit = permit.map_err(|_| PoolError::Released)?;
        self.spawn_guarded(job, permit).await;
        Ok(())
    }

    /// Dispatch `job`, failing immediately with [`PoolError::Overloaded`]
    /// if `max_blocking` jobs are already waiting for a worker instead of
    /// joining the queue.
    pub async fn try_submit<F>(&self, job: F) -> Result<(), (F, PoolError)>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let waiting = self.waiters.load(Ordering::SeqCst);
        if waiting >= self.max_blocking {
            return Err((
                job,
                PoolError::Overloaded {
                    waiting,
                    max: self.max_blocking,
                },
            ));
        }
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let permit = self.semaphore.clone().acquire_owned().await;
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        match permit {
            Ok(permit) => {
                self.spawn_guarded(job, permit).await;
                Ok(())
            }
            Err(_) => Err((job, PoolError::Released)),
        }
    }

    /// [`Self::try_submit`], retrying up to 3 times at a ~100ms fixed delay
    /// on [`PoolError::Overloaded`] before giving up.
    pub async fn submit_with_retry<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        const MAX_RETRIES: u32 = 3;
        const RETRY_DELAY: Duration = Duration::from_millis(100);

        let mut current = job;
        for attempt in 0..=MAX_RETRIES {
            match self.try_submit(current).await {
                Ok(()) => return Ok(()),
                Err((_, err @ PoolError::Released)) => return Err(err),
                Err((returned, err)) => {
                    if attempt == MAX_RETRIES {
                        return Err(err);
                    }
                    current = returned;
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
        unreachable!("loop always returns by MAX_RETRIES")
    }

    /// Drain and tear down the pool. Safe to call more than once — a
    /// second call simply finds nothing left to abort.
    pub async fn release(&self) {
        let mut tasks = self.tasks.lock().await;
        tasks.shutdown().await;
    }

    async fn spawn_guarded<F>(&self, job: F, permit: tokio::sync::OwnedSemaphorePermit)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().await;
        tasks.spawn(async move {
            job.await;
            drop(permit);
        });
        // Reap finished handles opportunistically so the set doesn't grow
        // without bound; panics inside a job are caught by JoinSet and
        // surfaced here as a JoinError rather than tearing down the pool.
        while let Some(result) = tasks.try_join_next() {
            if let Err(join_err) = result {
                if join_err.is_panic() {
                    warn!(error = %join_err, "worker pool job panicked");
                }
            }
        }
    }
}
