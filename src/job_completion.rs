use crate::errors::JobError;
use crate::errors::PanicInfo;

/// represents the outcome of one job execution, as observed by the consumer.
///
/// The consumer logs each completion and moves on; no variant is ever
/// propagated to the submitter.  Producers that care about outcomes encode
/// them into their own job type, or retrieve the finished job through the
/// [completion service](crate::completion_service::JobCompletionService).
#[derive(Debug)]
pub enum JobCompletion {
    /// The job finished processing normally.
    Completed,
    /// The job ran and reported a failure.  No automatic retry.
    Failed(JobError),
    /// The job was cancelled before or during processing.
    Cancelled,
    /// The job panicked during processing.
    Panicked(PanicInfo),
}

impl std::fmt::Display for JobCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            Self::Completed => "Completed",
            Self::Failed(_) => "Failed",
            Self::Cancelled => "Cancelled",
            Self::Panicked(_) => "Panicked",
        };

        write!(f, "{}", str)
    }
}

impl JobCompletion {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
