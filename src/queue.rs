use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::channels::JobAddedReceiver;
use crate::channels::JobAddedSender;
use crate::job_completion::JobCompletion;
use crate::job_id::JobId;
use crate::traits::Job;
use crate::worker_pool::WorkerPool;

/// construction parameters for a [JobQueue].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// upper bound on buffered (queued-but-not-yet-drained) jobs.
    ///
    /// [JobQueue::submit] fails fast with `false` at this bound rather than
    /// blocking.  The default is deliberately large; admission control is
    /// expected to happen upstream via the
    /// [completion service](crate::completion_service::JobCompletionService),
    /// and this bound is a last-resort safety valve against unbounded
    /// memory growth.
    pub capacity: usize,

    /// how long [JobQueue::stop] waits for the consumer task to exit before
    /// aborting it.
    pub shutdown_grace: Duration,

    /// number of pool workers for parallel dispatch.  0 means jobs execute
    /// inline on the consumer task itself.
    ///
    /// Inline execution is the default: it sacrifices throughput for
    /// ordering predictability, since exactly one job runs at a time and
    /// batch priority order is also completion order.  With workers
    /// attached, jobs are handed to the pool and complete in whatever order
    /// the pool schedules them; when the pool is saturated the consumer
    /// runs the job itself so the queue always makes forward progress.
    pub workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1 << 20,
            shutdown_grace: Duration::from_secs(1),
            workers: 0,
        }
    }
}

/// implements a prioritized job queue with a single batching consumer.
///
/// `start()` spawns the consumer task; `submit()` never blocks; `stop()`
/// shuts the consumer down via a poison sentinel with a bounded grace wait.
/// See the [crate docs](crate) for the full contract.
///
/// The queue is an explicitly constructed object.  The application's
/// composition root owns it, shares it as `Arc<JobQueue>`, and decides when
/// to stop it.  Starting a new queue after stopping an old one yields a
/// fresh, empty, fully independent scheduler.
pub struct JobQueue {
    /// holds the job buffer which is shared between tokio tasks
    shared: Arc<Mutex<SharedBuffer>>,

    /// channel to inform the process_jobs task that a job has been added
    tx_job_added: JobAddedSender,

    /// set once stop() begins; submit() rejects from then on
    stopping: AtomicBool,

    capacity: usize,
    shutdown_grace: Duration,

    /// JoinHandle of the process_jobs task.  taken by the stop() call that
    /// performs the join.
    consumer_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("capacity", &self.capacity)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("stopping", &self.stopping.load(Ordering::SeqCst))
            .field("num_queued_jobs", &self.num_queued_jobs())
            .finish()
    }
}

// we implement Drop so an abandoned queue still poisons its consumer task
impl Drop for JobQueue {
    fn drop(&mut self) {
        tracing::debug!("in JobQueue::drop()");

        if !self.stopping.swap(true, Ordering::SeqCst) {
            if let Ok(mut guard) = self.shared.lock() {
                guard.push_poison();
            }
            let _ = self.tx_job_added.send(());
        }
    }
}

impl JobQueue {
    /// creates the job queue and starts it processing.  returns immediately.
    ///
    /// must be called from within a tokio runtime.
    pub fn start(config: QueueConfig) -> Self {
        let pool = (config.workers > 0).then(|| Arc::new(WorkerPool::new(config.workers)));
        Self::start_inner(config, pool)
    }

    /// like [start](Self::start), but dispatches to an externally owned
    /// [WorkerPool], which may be shared with other queues.  the pool
    /// overrides `config.workers`.
    pub fn start_with_pool(config: QueueConfig, pool: Arc<WorkerPool>) -> Self {
        Self::start_inner(config, Some(pool))
    }

    fn start_inner(config: QueueConfig, pool: Option<Arc<WorkerPool>>) -> Self {
        let shared = Arc::new(Mutex::new(SharedBuffer::new()));

        // create the 'job_added' channel for signalling the process_jobs task
        let (tx_job_added, rx_job_added) = mpsc::unbounded_channel();

        // spawn the process_jobs task
        let consumer_task = tokio::spawn(process_jobs(
            shared.clone(),
            tx_job_added.clone(),
            rx_job_added,
            pool,
        ));

        tracing::info!(
            "JobQueue: started new queue.  capacity: {}, workers: {}",
            config.capacity,
            config.workers
        );

        Self {
            shared,
            tx_job_added,
            stopping: AtomicBool::new(false),
            capacity: config.capacity,
            shutdown_grace: config.shutdown_grace,
            consumer_task: tokio::sync::Mutex::new(Some(consumer_task)),
        }
    }

    /// adds a job to the queue.  never blocks.
    ///
    /// returns false, rather than erroring, when the buffer is at capacity
    /// or the queue is stopping; the caller may retry later or drop the job.
    pub fn submit(&self, job: Arc<dyn Job>) -> bool {
        if self.stopping.load(Ordering::SeqCst) {
            tracing::debug!(
                "JobQueue: rejecting job '{}' - queue is stopping",
                job.name()
            );
            return false;
        }

        let job_id = JobId::random();

        let num_queued = {
            // acquire mutex lock
            let mut guard = self.shared.lock().unwrap();

            if guard.num_jobs >= self.capacity {
                tracing::warn!(
                    "JobQueue: rejecting job '{}' - buffer at capacity ({})",
                    job.name(),
                    self.capacity
                );
                return false;
            }

            guard.push_job(QueuedJob { job_id, job });
            guard.num_jobs
        }; // mutex lock released on drop

        // notify the process_jobs task that a job was added.
        if self.tx_job_added.send(()).is_err() {
            // consumer exited between the stopping check and here.  the job
            // will never run; take it back out so it is not left stranded.
            tracing::debug!("JobQueue: consumer gone; withdrawing job {}", job_id);
            self.shared.lock().unwrap().remove_job(job_id);
            return false;
        }

        tracing::debug!(
            "JobQueue: job added - {}  {} queued job(s)",
            job_id,
            num_queued
        );

        true
    }

    /// stops the queue: feeds the poison sentinel through the insertion
    /// path, then waits up to the configured grace period for the consumer
    /// task to exit before aborting it.
    ///
    /// safe to call multiple times; repeat calls are no-ops.  never errors;
    /// shutdown-path problems are logged and the forced-abort path taken.
    pub async fn stop(&self) {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            tracing::info!("JobQueue: stopping.");

            // the sentinel bypasses the capacity check so that shutdown
            // cannot be wedged by a full buffer.
            self.shared.lock().unwrap().push_poison();
            if self.tx_job_added.send(()).is_err() {
                tracing::debug!("JobQueue: consumer already gone at stop");
            }
        }

        let handle = self.consumer_task.lock().await.take();
        let Some(mut handle) = handle else {
            // a previous stop() already joined the consumer
            return;
        };

        match tokio::time::timeout(self.shutdown_grace, &mut handle).await {
            Ok(Ok(())) => tracing::debug!("JobQueue: consumer task exited cleanly"),
            Ok(Err(e)) => tracing::warn!("JobQueue: consumer task ended abnormally: {}", e),
            Err(_) => {
                tracing::warn!(
                    "JobQueue: consumer did not exit within {:?} - aborting it",
                    self.shutdown_grace
                );
                handle.abort();
                let _ = handle.await;
            }
        }
    }

    /// returns the number of buffered jobs.  jobs currently executing are
    /// not counted.
    pub fn num_queued_jobs(&self) -> usize {
        self.shared.lock().unwrap().num_jobs
    }

    pub fn is_empty(&self) -> bool {
        self.num_queued_jobs() == 0
    }
}

/// represents a job in the buffer.
struct QueuedJob {
    job_id: JobId,
    job: Arc<dyn Job>,
}

/// an entry in the buffer: a job, or the poison sentinel that tells the
/// consumer to exit after the batch it is drained with.
enum QueueEntry {
    Job(QueuedJob),
    Poison,
}

/// represents data shared between the queue handle and the consumer task
struct SharedBuffer {
    entries: VecDeque<QueueEntry>,
    /// job count, excluding any poison entry, kept so the capacity check in
    /// submit() is O(1)
    num_jobs: usize,
}

impl SharedBuffer {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            num_jobs: 0,
        }
    }

    fn push_job(&mut self, queued: QueuedJob) {
        self.entries.push_back(QueueEntry::Job(queued));
        self.num_jobs += 1;
    }

    fn push_poison(&mut self) {
        self.entries.push_back(QueueEntry::Poison);
    }

    fn remove_job(&mut self, job_id: JobId) {
        self.entries.retain(|entry| match entry {
            QueueEntry::Job(queued) => queued.job_id != job_id,
            QueueEntry::Poison => true,
        });
        self.num_jobs = self
            .entries
            .iter()
            .filter(|entry| matches!(entry, QueueEntry::Job(_)))
            .count();
    }

    /// removes and returns every buffered job, and whether the poison
    /// sentinel was among the drained entries.
    fn drain_batch(&mut self) -> (Vec<QueuedJob>, bool) {
        let mut poisoned = false;
        let mut batch = Vec::with_capacity(self.num_jobs);

        for entry in self.entries.drain(..) {
            match entry {
                QueueEntry::Job(queued) => batch.push(queued),
                QueueEntry::Poison => poisoned = true,
            }
        }
        self.num_jobs = 0;

        (batch, poisoned)
    }
}

/// implements the process_jobs task, spawned by JobQueue::start().
///
/// this fn loops on the 'job_added' channel.  On each wakeup it drains the
/// whole buffer into a local batch under one lock acquisition, strips the
/// poison sentinel if present, sorts the batch by rank ascending (the sort
/// is stable, so equal ranks keep their insertion order within a batch) and
/// processes the batch in that order:
///
/// - cancelled jobs are discarded.
/// - paused jobs have their pause flag cleared and are re-offered to the
///   buffer for a later batch.  they are not executed this round.
/// - everything else is dispatched: to the worker pool when one is attached
///   and has capacity, otherwise inline on this task.
///
/// if the sentinel was drained, the task exits after finishing the batch.
///
/// Batching bounds lock contention and lets priority reordering take effect
/// between batches rather than within one.  The trade-off: across batches
/// there is no global priority order.  A low-rank job submitted after a
/// drain can run before a high-rank job that lands in the very next batch.
///
/// each job is its own error boundary.  failures and panics are caught,
/// logged, and counted as completed; a bad job cannot take down this task.
async fn process_jobs(
    shared: Arc<Mutex<SharedBuffer>>,
    tx_job_added: JobAddedSender,
    mut rx_job_added: JobAddedReceiver,
    pool: Option<Arc<WorkerPool>>,
) {
    // job number starts at 1 and increments with each job dispatched.  note
    // that dispatch order may differ from submission order due to job ranks.
    let mut job_num: usize = 1;

    while rx_job_added.recv().await.is_some() {
        let (mut batch, poisoned) = {
            // acquire mutex lock
            shared.lock().unwrap().drain_batch()
        }; // mutex lock released on drop

        if batch.is_empty() && !poisoned {
            // a prior drain already swept the jobs this signal announced
            continue;
        }

        batch.sort_by_key(|queued| queued.job.rank());

        tracing::debug!(
            "JobQueue: drained batch of {} job(s){}",
            batch.len(),
            if poisoned { " + stop sentinel" } else { "" }
        );

        for queued in batch {
            if queued.job.is_cancelled() {
                tracing::debug!(
                    "JobQueue: discarding cancelled job {} '{}'",
                    queued.job_id,
                    queued.job.name()
                );
                continue;
            }

            if queued.job.is_paused() {
                // pause policy: clear the flag and re-offer the job for a
                // later batch.  it runs next time around unless it has been
                // paused again in the meantime.  re-offered jobs do not go
                // through the capacity check; they already held a slot.
                queued.job.proceed();
                tracing::debug!(
                    "JobQueue: re-offering paused job {} '{}'",
                    queued.job_id,
                    queued.job.name()
                );
                shared.lock().unwrap().push_job(queued);
                let _ = tx_job_added.send(());
                continue;
            }

            let pooled = pool
                .as_ref()
                .map(|p| p.try_dispatch(queued.job.clone(), queued.job_id))
                .unwrap_or(false);

            if pooled {
                tracing::debug!(
                    "JobQueue: job #{} - {} '{}' handed off to worker pool",
                    job_num,
                    queued.job_id,
                    queued.job.name()
                );
            } else {
                // inline: either no pool is attached, or the pool is
                // saturated and the caller-runs fallback kicks in.
                tracing::debug!(
                    "  *** JobQueue: begin job #{} - {} '{}' rank {} ***",
                    job_num,
                    queued.job_id,
                    queued.job.name(),
                    queued.job.rank()
                );

                let timer = tokio::time::Instant::now();
                let completion = run_job(&queued.job).await;

                tracing::debug!(
                    "  *** JobQueue: ended job #{} - {} - Completion: {} - {} secs ***",
                    job_num,
                    queued.job_id,
                    completion,
                    timer.elapsed().as_secs_f32()
                );

                log_degraded_completion(&completion, queued.job_id, queued.job.name());
            }
            job_num += 1;
        }

        if poisoned {
            // stop sentinel was in this batch.  processing ends.
            break;
        }
    }
    tracing::debug!("task process_jobs exiting");
}

fn log_degraded_completion(completion: &JobCompletion, job_id: JobId, name: &str) {
    match completion {
        JobCompletion::Failed(e) => {
            tracing::warn!("JobQueue: job {} '{}' failed: {}", job_id, name, e);
        }
        JobCompletion::Panicked(info) => {
            tracing::warn!(
                "JobQueue: job {} '{}' panicked: {:?}",
                job_id,
                name,
                info.panic_message()
            );
        }
        JobCompletion::Completed | JobCompletion::Cancelled => {}
    }
}

/// runs one job to completion and classifies the outcome.
///
/// blocking jobs execute on tokio's blocking thread-pool via
/// spawn_blocking(); async jobs are awaited in place, behind a panic
/// boundary.  A job that was cancelled while executing reports Cancelled
/// regardless of what its run method returned.
pub(crate) async fn run_job(job: &Arc<dyn Job>) -> JobCompletion {
    if job.is_cancelled() {
        return JobCompletion::Cancelled;
    }

    let result = if job.is_async() {
        match AssertUnwindSafe(job.run_async_cancellable())
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => return JobCompletion::Panicked(panic.into()),
        }
    } else {
        let job = job.clone();
        match tokio::task::spawn_blocking(move || job.run()).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => return JobCompletion::Panicked(e.into_panic().into()),
            // the blocking task can only be cancelled at runtime shutdown
            Err(_) => return JobCompletion::Cancelled,
        }
    };

    match result {
        _ if job.is_cancelled() => JobCompletion::Cancelled,
        Ok(()) => JobCompletion::Completed,
        Err(e) => JobCompletion::Failed(e),
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    #[traced_test]
    async fn batch_runs_in_rank_order() -> anyhow::Result<()> {
        workers::batch_runs_in_rank_order().await
    }

    #[tokio::test(flavor = "multi_thread")]
    #[traced_test]
    async fn capacity_overflow_is_rejected() -> anyhow::Result<()> {
        workers::capacity_overflow_is_rejected().await
    }

    #[tokio::test(flavor = "multi_thread")]
    #[traced_test]
    async fn cancelled_job_never_runs() -> anyhow::Result<()> {
        workers::cancelled_job_never_runs().await
    }

    #[tokio::test(flavor = "multi_thread")]
    #[traced_test]
    async fn paused_job_is_reoffered_not_lost() -> anyhow::Result<()> {
        workers::paused_job_is_reoffered_not_lost().await
    }

    #[tokio::test(flavor = "multi_thread")]
    #[traced_test]
    async fn failed_job_does_not_kill_the_consumer() -> anyhow::Result<()> {
        workers::degraded_job_does_not_kill_the_consumer(workers::Flavor::Failing).await
    }

    #[tokio::test(flavor = "multi_thread")]
    #[traced_test]
    async fn panicked_job_does_not_kill_the_consumer() -> anyhow::Result<()> {
        workers::degraded_job_does_not_kill_the_consumer(workers::Flavor::Panicking).await
    }

    #[tokio::test(flavor = "multi_thread")]
    #[traced_test]
    async fn blocking_job_runs_and_honors_cancel() -> anyhow::Result<()> {
        workers::blocking_job_runs_and_honors_cancel().await
    }

    #[tokio::test(flavor = "multi_thread")]
    #[traced_test]
    async fn stop_is_idempotent_and_restart_is_fresh() -> anyhow::Result<()> {
        workers::stop_is_idempotent_and_restart_is_fresh().await
    }

    #[tokio::test(flavor = "multi_thread")]
    #[traced_test]
    async fn stop_aborts_a_wedged_consumer_within_grace() -> anyhow::Result<()> {
        workers::stop_aborts_a_wedged_consumer_within_grace().await
    }

    #[tokio::test(flavor = "multi_thread")]
    #[traced_test]
    async fn submit_after_stop_is_rejected() -> anyhow::Result<()> {
        workers::submit_after_stop_is_rejected().await
    }

    #[tokio::test(flavor = "multi_thread")]
    #[traced_test]
    async fn pool_dispatch_runs_jobs_concurrently() -> anyhow::Result<()> {
        workers::pool_dispatch_runs_jobs_concurrently().await
    }

    pub(super) mod workers {
        use std::sync::atomic::AtomicUsize;
        use std::sync::atomic::Ordering as AtomicOrdering;
        use std::time::Duration;

        use tokio::sync::Notify;

        use super::*;
        use crate::errors::JobError;
        use crate::job_state::JobState;

        /// a job that appends its rank to a shared log when it runs.
        pub struct RecordingJob {
            rank: i64,
            name: String,
            state: JobState,
            log: Arc<Mutex<Vec<i64>>>,
        }

        impl RecordingJob {
            pub fn new(rank: i64, log: Arc<Mutex<Vec<i64>>>) -> Arc<Self> {
                Arc::new(Self {
                    rank,
                    name: format!("recording-{}", rank),
                    state: JobState::new(),
                    log,
                })
            }
        }

        #[async_trait::async_trait]
        impl Job for RecordingJob {
            fn rank(&self) -> i64 {
                self.rank
            }

            fn name(&self) -> &str {
                &self.name
            }

            fn state(&self) -> &JobState {
                &self.state
            }

            fn is_async(&self) -> bool {
                true
            }

            async fn run_async(&self) -> Result<(), JobError> {
                self.log.lock().unwrap().push(self.rank);
                Ok(())
            }
        }

        /// a job that parks the consumer until released, so tests can stack
        /// further submissions into a single later batch.
        pub struct PlugJob {
            state: JobState,
            started: Arc<AtomicUsize>,
            release: Arc<Notify>,
        }

        impl PlugJob {
            pub fn new(started: Arc<AtomicUsize>, release: Arc<Notify>) -> Arc<Self> {
                Arc::new(Self {
                    state: JobState::new(),
                    started,
                    release,
                })
            }
        }

        #[async_trait::async_trait]
        impl Job for PlugJob {
            fn rank(&self) -> i64 {
                i64::MIN
            }

            fn name(&self) -> &str {
                "plug"
            }

            fn state(&self) -> &JobState {
                &self.state
            }

            fn is_async(&self) -> bool {
                true
            }

            async fn run_async(&self) -> Result<(), JobError> {
                self.started.fetch_add(1, AtomicOrdering::SeqCst);
                self.release.notified().await;
                Ok(())
            }
        }

        pub async fn wait_until(what: &str, mut probe: impl FnMut() -> bool) -> anyhow::Result<()> {
            for _ in 0..500 {
                if probe() {
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            anyhow::bail!("timed out waiting for: {}", what);
        }

        /// parks the consumer behind a plug job and returns the release
        /// handle once the plug is executing.
        async fn plug_consumer(queue: &JobQueue) -> anyhow::Result<Arc<Notify>> {
            let started = Arc::new(AtomicUsize::new(0));
            let release = Arc::new(Notify::new());
            assert!(queue.submit(PlugJob::new(started.clone(), release.clone())));
            wait_until("plug job to start", || {
                started.load(AtomicOrdering::SeqCst) == 1
            })
            .await?;
            Ok(release)
        }

        // verifies that jobs stacked into one batch run in non-decreasing
        // rank order, regardless of submission order.
        pub async fn batch_runs_in_rank_order() -> anyhow::Result<()> {
            let queue = JobQueue::start(QueueConfig::default());
            let log = Arc::new(Mutex::new(Vec::new()));

            let release = plug_consumer(&queue).await?;

            // stacked while the consumer is busy, so all three land in the
            // same later batch.
            for rank in [5, 1, 3] {
                assert!(queue.submit(RecordingJob::new(rank, log.clone())));
            }
            release.notify_one();

            wait_until("all jobs to run", || log.lock().unwrap().len() == 3).await?;
            assert_eq!(vec![1, 3, 5], *log.lock().unwrap());

            queue.stop().await;
            Ok(())
        }

        // verifies the fail-fast capacity bound: with capacity 3, exactly
        // the 4th buffered submission returns false.
        pub async fn capacity_overflow_is_rejected() -> anyhow::Result<()> {
            let queue = JobQueue::start(QueueConfig {
                capacity: 3,
                ..Default::default()
            });
            let log = Arc::new(Mutex::new(Vec::new()));

            let release = plug_consumer(&queue).await?;

            assert!(queue.submit(RecordingJob::new(1, log.clone())));
            assert!(queue.submit(RecordingJob::new(2, log.clone())));
            assert!(queue.submit(RecordingJob::new(3, log.clone())));
            assert!(!queue.submit(RecordingJob::new(4, log.clone())));
            assert_eq!(3, queue.num_queued_jobs());

            release.notify_one();
            wait_until("accepted jobs to run", || log.lock().unwrap().len() == 3).await?;

            queue.stop().await;
            Ok(())
        }

        // verifies that a job cancelled while queued is discarded, not run.
        pub async fn cancelled_job_never_runs() -> anyhow::Result<()> {
            let queue = JobQueue::start(QueueConfig::default());
            let log = Arc::new(Mutex::new(Vec::new()));

            let release = plug_consumer(&queue).await?;

            let doomed = RecordingJob::new(1, log.clone());
            let witness = RecordingJob::new(2, log.clone());
            assert!(queue.submit(doomed.clone()));
            assert!(queue.submit(witness));

            doomed.cancel();
            release.notify_one();

            // the witness running proves the batch was processed
            wait_until("witness job to run", || !log.lock().unwrap().is_empty()).await?;
            assert_eq!(vec![2], *log.lock().unwrap());

            queue.stop().await;
            Ok(())
        }

        // verifies the pause policy: a paused job is re-offered with its
        // flag cleared and runs in a later batch.
        pub async fn paused_job_is_reoffered_not_lost() -> anyhow::Result<()> {
            let queue = JobQueue::start(QueueConfig::default());
            let log = Arc::new(Mutex::new(Vec::new()));

            let release = plug_consumer(&queue).await?;

            let parked = RecordingJob::new(1, log.clone());
            parked.state().pause();
            assert!(queue.submit(parked.clone()));
            release.notify_one();

            // first drain re-offers it with the flag cleared; the next
            // drain runs it.
            wait_until("paused job to run eventually", || {
                log.lock().unwrap().len() == 1
            })
            .await?;
            assert!(!parked.is_paused());

            queue.stop().await;
            Ok(())
        }

        pub enum Flavor {
            Failing,
            Panicking,
        }

        struct DegradedJob {
            state: JobState,
            flavor: Flavor,
        }

        #[async_trait::async_trait]
        impl Job for DegradedJob {
            fn rank(&self) -> i64 {
                1
            }

            fn name(&self) -> &str {
                "degraded"
            }

            fn state(&self) -> &JobState {
                &self.state
            }

            fn is_async(&self) -> bool {
                true
            }

            async fn run_async(&self) -> Result<(), JobError> {
                match self.flavor {
                    Flavor::Failing => Err(JobError::new("job reports failure")),
                    Flavor::Panicking => panic!("job panics unexpectedly"),
                }
            }
        }

        // verifies that a failing or panicking job is contained by the
        // consumer's per-job error boundary: the queue keeps accepting and
        // processing jobs afterwards.
        pub async fn degraded_job_does_not_kill_the_consumer(
            flavor: Flavor,
        ) -> anyhow::Result<()> {
            let queue = JobQueue::start(QueueConfig::default());
            let log = Arc::new(Mutex::new(Vec::new()));

            assert!(queue.submit(Arc::new(DegradedJob {
                state: JobState::new(),
                flavor,
            })));

            // ensure we can still run another job afterwards.
            assert!(queue.submit(RecordingJob::new(7, log.clone())));
            wait_until("follow-up job to run", || log.lock().unwrap().len() == 1).await?;

            queue.stop().await;
            Ok(())
        }

        struct BlockingCountdownJob {
            state: JobState,
            iterations: Arc<AtomicUsize>,
            bounded: bool,
        }

        impl Job for BlockingCountdownJob {
            fn rank(&self) -> i64 {
                1
            }

            fn name(&self) -> &str {
                "blocking-countdown"
            }

            fn state(&self) -> &JobState {
                &self.state
            }

            fn is_async(&self) -> bool {
                false
            }

            fn run(&self) -> Result<(), JobError> {
                // main processing loop; polls for cancellation each pass.
                loop {
                    if self.is_cancelled() {
                        return Ok(());
                    }
                    let done = self.iterations.fetch_add(1, AtomicOrdering::SeqCst);
                    if self.bounded && done >= 4 {
                        return Ok(());
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
        }

        // verifies that a blocking job executes on the blocking pool, and
        // that an unbounded one exits via the cooperative cancel flag.
        pub async fn blocking_job_runs_and_honors_cancel() -> anyhow::Result<()> {
            let queue = JobQueue::start(QueueConfig::default());

            let bounded_iterations = Arc::new(AtomicUsize::new(0));
            assert!(queue.submit(Arc::new(BlockingCountdownJob {
                state: JobState::new(),
                iterations: bounded_iterations.clone(),
                bounded: true,
            })));
            wait_until("bounded blocking job to finish", || {
                bounded_iterations.load(AtomicOrdering::SeqCst) >= 5
            })
            .await?;

            let unbounded = Arc::new(BlockingCountdownJob {
                state: JobState::new(),
                iterations: Arc::new(AtomicUsize::new(0)),
                bounded: false,
            });
            assert!(queue.submit(unbounded.clone()));
            wait_until("unbounded blocking job to start", || {
                unbounded.iterations.load(AtomicOrdering::SeqCst) > 0
            })
            .await?;

            unbounded.cancel();

            // stop() returning within the grace proves the job exited on
            // the cancel flag rather than wedging the consumer.
            queue.stop().await;
            Ok(())
        }

        // verifies that stop drains cleanly, repeat stops are no-ops, and a
        // queue started afterwards is fresh and empty.
        pub async fn stop_is_idempotent_and_restart_is_fresh() -> anyhow::Result<()> {
            let queue = JobQueue::start(QueueConfig::default());
            let log = Arc::new(Mutex::new(Vec::new()));

            for rank in [2, 1] {
                assert!(queue.submit(RecordingJob::new(rank, log.clone())));
            }

            queue.stop().await;
            queue.stop().await;
            assert!(!queue.submit(RecordingJob::new(3, log.clone())));

            // a fresh queue is empty and processes work independently.
            let queue2 = JobQueue::start(QueueConfig::default());
            assert!(queue2.is_empty());
            assert!(queue2.submit(RecordingJob::new(9, log.clone())));
            wait_until("fresh queue to run a job", || {
                log.lock().unwrap().contains(&9)
            })
            .await?;

            queue2.stop().await;
            Ok(())
        }

        // verifies the forced-abort path: a consumer stuck in a job that
        // ignores cancellation is aborted once the grace period elapses.
        pub async fn stop_aborts_a_wedged_consumer_within_grace() -> anyhow::Result<()> {
            struct WedgeJob {
                state: JobState,
            }

            #[async_trait::async_trait]
            impl Job for WedgeJob {
                fn rank(&self) -> i64 {
                    1
                }

                fn name(&self) -> &str {
                    "wedge"
                }

                fn state(&self) -> &JobState {
                    &self.state
                }

                fn is_async(&self) -> bool {
                    true
                }

                async fn run_async_cancellable(&self) -> Result<(), JobError> {
                    // deliberately ignores the cancel flag
                    std::future::pending().await
                }
            }

            let grace = Duration::from_millis(100);
            let queue = JobQueue::start(QueueConfig {
                shutdown_grace: grace,
                ..Default::default()
            });

            assert!(queue.submit(Arc::new(WedgeJob {
                state: JobState::new(),
            })));
            tokio::time::sleep(Duration::from_millis(20)).await;

            let timer = tokio::time::Instant::now();
            queue.stop().await;
            let elapsed = timer.elapsed();

            assert!(elapsed >= grace);
            assert!(elapsed < grace + Duration::from_secs(1));
            Ok(())
        }

        pub async fn submit_after_stop_is_rejected() -> anyhow::Result<()> {
            let queue = JobQueue::start(QueueConfig::default());
            queue.stop().await;

            let log = Arc::new(Mutex::new(Vec::new()));
            assert!(!queue.submit(RecordingJob::new(1, log.clone())));
            assert!(log.lock().unwrap().is_empty());
            Ok(())
        }

        struct ConcurrencyProbeJob {
            state: JobState,
            active: Arc<AtomicUsize>,
            peak: Arc<AtomicUsize>,
            done: Arc<AtomicUsize>,
        }

        #[async_trait::async_trait]
        impl Job for ConcurrencyProbeJob {
            fn rank(&self) -> i64 {
                1
            }

            fn name(&self) -> &str {
                "concurrency-probe"
            }

            fn state(&self) -> &JobState {
                &self.state
            }

            fn is_async(&self) -> bool {
                true
            }

            async fn run_async(&self) -> Result<(), JobError> {
                let now = self.active.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                self.peak.fetch_max(now, AtomicOrdering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                self.active.fetch_sub(1, AtomicOrdering::SeqCst);
                self.done.fetch_add(1, AtomicOrdering::SeqCst);
                Ok(())
            }
        }

        // verifies pool dispatch: with workers attached, jobs overlap, and
        // the cap plus the caller-runs fallback keep everything completing.
        pub async fn pool_dispatch_runs_jobs_concurrently() -> anyhow::Result<()> {
            let queue = JobQueue::start(QueueConfig {
                workers: 3,
                ..Default::default()
            });

            let active = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));
            let done = Arc::new(AtomicUsize::new(0));

            for _ in 0..10 {
                assert!(queue.submit(Arc::new(ConcurrencyProbeJob {
                    state: JobState::new(),
                    active: active.clone(),
                    peak: peak.clone(),
                    done: done.clone(),
                })));
            }

            wait_until("all pooled jobs to finish", || {
                done.load(AtomicOrdering::SeqCst) == 10
            })
            .await?;

            // 3 pool workers plus at most one caller-runs job on the
            // consumer itself.
            assert!(peak.load(AtomicOrdering::SeqCst) >= 2);
            assert!(peak.load(AtomicOrdering::SeqCst) <= 4);

            queue.stop().await;
            Ok(())
        }
    }
}
