use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::sync::OwnedSemaphorePermit;
use tokio::sync::Semaphore;

use crate::channels::GateReceiver;
use crate::channels::GateSender;
use crate::channels::ResultsReceiver;
use crate::channels::ResultsSender;
use crate::errors::JobError;
use crate::errors::PanicInfo;
use crate::job_state::JobState;
use crate::queue::JobQueue;
use crate::traits::Job;

/// caps how many jobs are concurrently in flight through a [JobQueue], and
/// surfaces each finished job through a separate pull-based output.
///
/// The queue's own capacity is a large safety valve; this wrapper is the
/// intended admission control.  `submit()` waits for one of
/// `admission_limit` slots, wraps the job so that the slot is released
/// exactly when the job finishes, and hands the wrapper to the underlying
/// queue.  A slot is held from admission until the wrapped execution
/// finishes, whether it finishes by completing, failing, panicking, being
/// cancelled, or being discarded from the queue as cancelled.
///
/// Finished jobs (the originals, never the wrappers) land on an unbounded
/// output in completion order, retrieved with [take](Self::take),
/// [poll](Self::poll) or [poll_timeout](Self::poll_timeout).  The output is
/// unbounded by design: its producers are rate-limited upstream by the
/// admission cap.
///
/// With `admission_limit` 0 the service delegates submissions directly to
/// the queue: no cap, no wrapping, and nothing surfaces on the output.
pub struct JobCompletionService {
    queue: Arc<JobQueue>,
    admission_limit: usize,
    admission: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    results_tx: ResultsSender,
    results_rx: tokio::sync::Mutex<ResultsReceiver>,
}

impl std::fmt::Debug for JobCompletionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobCompletionService")
            .field("admission_limit", &self.admission_limit)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl JobCompletionService {
    /// creates a service over `queue` admitting at most `admission_limit`
    /// concurrently in-flight jobs.  0 means unbounded (direct delegation).
    pub fn new(queue: Arc<JobQueue>, admission_limit: usize) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        Self {
            queue,
            admission_limit,
            // the semaphore is unused in unbounded mode but must hold at
            // least one permit so the type is uniformly constructed.
            admission: Arc::new(Semaphore::new(admission_limit.max(1))),
            in_flight: Arc::new(AtomicUsize::new(0)),
            results_tx,
            results_rx: tokio::sync::Mutex::new(results_rx),
        }
    }

    pub fn admission_limit(&self) -> usize {
        self.admission_limit
    }

    /// number of jobs admitted but not yet finished.  never exceeds the
    /// admission limit.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// submits a job, waiting for an admission slot if none is free.
    ///
    /// returns false if the underlying queue rejects the job (full or
    /// stopping); the just-reserved slot is released first, so a failed
    /// submission leaks nothing.
    pub async fn submit(&self, job: Arc<dyn Job>) -> bool {
        if self.admission_limit == 0 {
            return self.queue.submit(job);
        }

        let Ok(permit) = self.admission.clone().acquire_owned().await else {
            // the semaphore is never closed by this type; fail cleanly
            // rather than panicking if that ever changes.
            tracing::warn!(
                "JobCompletionService: admission semaphore closed; rejecting job '{}'",
                job.name()
            );
            return false;
        };

        self.admit(job, permit)
    }

    /// like [submit](Self::submit), but returns false immediately when no
    /// admission slot is free.
    pub fn try_submit(&self, job: Arc<dyn Job>) -> bool {
        if self.admission_limit == 0 {
            return self.queue.submit(job);
        }

        match self.admission.clone().try_acquire_owned() {
            Ok(permit) => self.admit(job, permit),
            Err(_) => {
                tracing::debug!(
                    "JobCompletionService: no admission slot free for job '{}'",
                    job.name()
                );
                false
            }
        }
    }

    fn admit(&self, job: Arc<dyn Job>, permit: OwnedSemaphorePermit) -> bool {
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        // the gate starts closed; the wrapper will not execute the inner
        // job until the gate opens, which only happens below once the
        // queue has accepted the wrapper.
        let (gate_tx, gate_rx): (GateSender, GateReceiver) = watch::channel(false);

        let tracked = Arc::new(TrackedJob {
            inner: job,
            gate: gate_rx,
            permit: Mutex::new(Some(permit)),
            results_tx: self.results_tx.clone(),
            in_flight: self.in_flight.clone(),
            finished: AtomicBool::new(false),
        });

        let as_job: Arc<dyn Job> = tracked.clone();
        if !self.queue.submit(as_job) {
            tracing::debug!(
                "JobCompletionService: queue rejected job '{}'; admission slot released",
                tracked.inner.name()
            );
            tracked.withdraw();
            return false;
        }

        let _ = gate_tx.send(true);
        true
    }

    /// waits until a finished job is available and returns it.
    pub async fn take(&self) -> Arc<dyn Job> {
        self.results_rx
            .lock()
            .await
            .recv()
            .await
            .expect("results channel cannot close while the service holds a sender")
    }

    /// returns a finished job if one is immediately available.
    pub fn poll(&self) -> Option<Arc<dyn Job>> {
        self.results_rx.try_lock().ok()?.try_recv().ok()
    }

    /// waits up to `timeout` for a finished job.
    pub async fn poll_timeout(&self, timeout: Duration) -> Option<Arc<dyn Job>> {
        let mut rx = self.results_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(received) => received,
            Err(_) => None,
        }
    }
}

/// decorates an admitted job: holds the admission permit, gates execution
/// until the submission that created it has fully succeeded, and reports
/// the original job to the results output exactly once when the execution
/// finishes on any path.
///
/// The exactly-once edge does not rely on the run method being called at
/// all: the queue discards cancelled jobs without running them, and a
/// panicking inner job unwinds straight past the epilogue.  Both paths end
/// with the queue dropping its reference, so the Drop impl closes the gap.
struct TrackedJob {
    inner: Arc<dyn Job>,
    gate: GateReceiver,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
    results_tx: ResultsSender,
    in_flight: Arc<AtomicUsize>,
    finished: AtomicBool,
}

impl TrackedJob {
    /// releases the admission slot and surfaces the original job.  only
    /// the first caller has any effect.
    fn finish(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Ok(mut slot) = self.permit.lock() {
            // dropping the permit frees the admission slot
            slot.take();
        }

        if self.results_tx.send(self.inner.clone()).is_err() {
            tracing::debug!(
                "JobCompletionService: receiver gone; finished job '{}' not surfaced",
                self.inner.name()
            );
        }
    }

    /// releases the admission slot without surfacing anything.  used when
    /// the queue rejected the wrapper, ie the job was never admitted.
    fn withdraw(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Ok(mut slot) = self.permit.lock() {
            slot.take();
        }
    }
}

impl Drop for TrackedJob {
    fn drop(&mut self) {
        self.finish();
    }
}

#[async_trait::async_trait]
impl Job for TrackedJob {
    // rank, name and state all delegate to the wrapped job, so the wrapper
    // schedules, logs and cancels exactly like the original.
    fn rank(&self) -> i64 {
        self.inner.rank()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn state(&self) -> &JobState {
        self.inner.state()
    }

    fn is_async(&self) -> bool {
        // the wrapper always awaits its gate, even around a blocking inner
        // job, which it forwards to the blocking pool itself.
        true
    }

    async fn run_async(&self) -> Result<(), JobError> {
        let mut gate = self.gate.clone();
        if gate.wait_for(|open| *open).await.is_err() {
            // gate sender dropped without opening: the submission was
            // abandoned before the queue accepted it.  nothing to do.
            return Ok(());
        }

        let result = if self.inner.is_async() {
            self.inner.run_async_cancellable().await
        } else {
            let inner = self.inner.clone();
            match tokio::task::spawn_blocking(move || inner.run()).await {
                Ok(result) => result,
                Err(e) if e.is_panic() => {
                    let info = PanicInfo::from(e.into_panic());
                    let msg = info
                        .panic_message()
                        .unwrap_or_else(|| "job panicked during processing".to_string());
                    Err(JobError::new(msg))
                }
                Err(_) => Ok(()),
            }
        };

        self.finish();
        result
    }
}
