use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::job_id::JobId;
use crate::queue::run_job;
use crate::traits::Job;

/// a shared, capacity-bounded pool for parallel job execution.
///
/// The pool is externally owned: the application constructs it once, may
/// share it between several [JobQueue](crate::queue::JobQueue) instances,
/// and attaches it via
/// [JobQueue::start_with_pool](crate::queue::JobQueue::start_with_pool).
/// Concurrency is capped with a semaphore; each dispatched job holds one
/// permit for the duration of its execution and releases it on drop, so a
/// job that panics cannot leak a permit.
///
/// When every permit is taken, dispatch falls back to running the job on
/// the caller's own task (the queue's consumer).  That guarantees forward
/// progress: a saturated pool degrades to sequential execution instead of
/// queueing unboundedly or dropping work.
#[derive(Debug)]
pub struct WorkerPool {
    max_workers: usize,
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    /// creates a pool that runs at most `max_workers` jobs concurrently.
    pub fn new(max_workers: usize) -> Self {
        tracing::info!("WorkerPool: created with {} worker(s)", max_workers);

        Self {
            max_workers,
            semaphore: Arc::new(Semaphore::new(max_workers)),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// number of jobs the pool could accept right now without falling back
    /// to the caller.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// number of jobs currently executing in the pool.
    pub fn active_workers(&self) -> usize {
        self.max_workers - self.semaphore.available_permits()
    }

    pub fn is_saturated(&self) -> bool {
        self.semaphore.available_permits() == 0
    }

    /// hands the job to the pool if a permit is immediately available.
    ///
    /// returns false when the pool is saturated, in which case the caller
    /// must run the job itself.
    pub(crate) fn try_dispatch(&self, job: Arc<dyn Job>, job_id: JobId) -> bool {
        let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
            return false;
        };

        tokio::spawn(async move {
            let timer = tokio::time::Instant::now();
            let completion = run_job(&job).await;
            tracing::debug!(
                "WorkerPool: ended job {} '{}' - Completion: {} - {:.3} secs",
                job_id,
                job.name(),
                completion,
                timer.elapsed().as_secs_f32()
            );
            drop(permit);
        });

        true
    }
}
