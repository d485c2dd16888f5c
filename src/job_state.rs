use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio_util::sync::CancellationToken;

/// the scheduling flags of a single job: cancelled and paused.
///
/// Both flags may be flipped from any thread while the job sits in the queue
/// or while it executes.  Cancellation is cooperative and one-way: once
/// cancelled, a job stays cancelled.  A cancelled job that is still queued is
/// silently discarded at the next batch drain; a cancelled job that is
/// already executing is expected to notice the flag at its own safe points
/// and bail out.
///
/// The paused flag is a cooperative back-off for jobs whose upstream
/// dependency is not ready yet.  The consumer does not execute a paused job;
/// it clears the flag and re-offers the job to the queue for a later batch,
/// trusting the job (or its producer) to pause it again if it is still not
/// ready.
///
/// Every [Job](crate::traits::Job) implementor embeds one `JobState` and
/// returns it from [Job::state](crate::traits::Job::state).
#[derive(Debug, Default)]
pub struct JobState {
    cancelled: CancellationToken,
    paused: AtomicBool,
}

/// a tagged view of the two flags.  Cancelled wins over paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// the job will execute when it is drained from the queue
    Ready,
    /// the job will be re-offered to the queue instead of executing
    Paused,
    /// the job will be discarded without executing
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            Self::Ready => "Ready",
            Self::Paused => "Paused",
            Self::Cancelled => "Cancelled",
        };

        write!(f, "{}", str)
    }
}

impl JobState {
    pub fn new() -> Self {
        Self::default()
    }

    /// requests cancellation.  idempotent.
    ///
    /// does not stop a job that is already executing; it only suppresses
    /// future execution and re-submission.
    pub fn cancel(&self) {
        self.cancelled.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }

    /// completes when (and if) the job is cancelled.
    ///
    /// async jobs get cancellation handling for free via
    /// [Job::run_async_cancellable](crate::traits::Job::run_async_cancellable),
    /// which selects over this future.  Blocking jobs poll
    /// [is_cancelled](Self::is_cancelled) instead.
    pub async fn cancelled(&self) {
        self.cancelled.cancelled().await;
    }

    /// marks the job as not ready to execute yet.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// clears the paused flag.  idempotent.
    pub fn proceed(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> JobStatus {
        if self.is_cancelled() {
            JobStatus::Cancelled
        } else if self.is_paused() {
            JobStatus::Paused
        } else {
            JobStatus::Ready
        }
    }
}
