use crate::errors::JobError;
use crate::job_state::JobState;
use crate::job_state::JobStatus;

/// represents any kind of job.
///
/// A job carries its own priority ([rank](Self::rank)), a stable
/// human-readable [name](Self::name) for log output, and its scheduling
/// flags ([state](Self::state)).  Jobs are shared as `Arc<dyn Job>`; a
/// producer typically keeps a clone of the `Arc` so it can
/// [cancel](Self::cancel) or pause the job after submission.
///
/// # blocking vs async
///
/// Both blocking and non-blocking (async) jobs are supported.  Blocking jobs
/// are called inside spawn_blocking() in order to execute on tokio's blocking
/// thread-pool.  Async jobs are simply awaited.
///
/// note: we provide unimplemented default methods for run and run_async.
/// This is so that implementing types only need to impl the appropriate
/// method.
///
/// # cancellation
///
/// Cancellation is cooperative.  Async jobs get it for free: the queue calls
/// [run_async_cancellable](Self::run_async_cancellable), whose default impl
/// races [run_async](Self::run_async) against the cancel flag.  Blocking
/// jobs must poll [is_cancelled](Self::is_cancelled) in their main
/// processing loop and return early when it trips.  Either way a job that
/// observes cancellation mid-flight simply returns; the consumer reads the
/// flag afterwards and records the execution as cancelled rather than
/// completed.
///
/// # failure
///
/// run/run_async return `Result<(), JobError>`.  An `Err` is caught and
/// logged by the consumer and the job is treated as completed.  Retry, if
/// desired, is the producer's responsibility, implemented by re-submitting a
/// fresh or continuation job.
#[async_trait::async_trait]
pub trait Job: Send + Sync {
    /// the job's priority.  lower rank runs first.
    ///
    /// Within one drained batch the consumer executes jobs in non-decreasing
    /// rank order.  The rank must not change after submission; the queue
    /// reads it at drain time and a shifting rank makes the execution order
    /// unspecified.
    fn rank(&self) -> i64;

    /// a human-readable identifier, stable for the lifetime of the job.
    ///
    /// Used in log output and by producers to recognize the same logical
    /// work across re-submissions.  The queue itself does not enforce
    /// uniqueness.
    fn name(&self) -> &str;

    /// the job's scheduling flags.  implementors embed a [JobState] field
    /// and return a reference to it here.
    fn state(&self) -> &JobState;

    fn is_async(&self) -> bool;

    /// implement this method to perform the work of a blocking job.
    ///
    /// it is necessary to regularly poll [is_cancelled](Self::is_cancelled)
    /// in the job's main processing loop.
    fn run(&self) -> Result<(), JobError> {
        unimplemented!()
    }

    /// implement this method to perform the work of an async job.
    async fn run_async(&self) -> Result<(), JobError> {
        unimplemented!()
    }

    /// This method is called by JobQueue.  The default implementation handles
    /// job cancellation, so most async Job implementors can simply impl
    /// run_async() and cancellation is automatic.
    async fn run_async_cancellable(&self) -> Result<(), JobError> {
        tokio::select! {
            _ = self.state().cancelled() => {
                tracing::debug!("async job got cancel message. cancelling.");
                Ok(())
            }

            job_result = self.run_async() => job_result,
        }
    }

    /// requests cancellation.  idempotent.  see [JobState::cancel].
    fn cancel(&self) {
        self.state().cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.state().is_cancelled()
    }

    fn is_paused(&self) -> bool {
        self.state().is_paused()
    }

    /// clears the paused flag.  see [JobState::proceed].
    fn proceed(&self) {
        self.state().proceed();
    }

    fn status(&self) -> JobStatus {
        self.state().status()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    struct NopJob {
        state: JobState,
    }

    #[async_trait::async_trait]
    impl Job for NopJob {
        fn rank(&self) -> i64 {
            7
        }

        fn name(&self) -> &str {
            "nop"
        }

        fn state(&self) -> &JobState {
            &self.state
        }

        fn is_async(&self) -> bool {
            true
        }

        async fn run_async(&self) -> Result<(), JobError> {
            Ok(())
        }
    }

    #[test]
    fn provided_methods_delegate_to_state() {
        let job = NopJob {
            state: JobState::new(),
        };
        assert_eq!(JobStatus::Ready, job.status());

        job.state().pause();
        assert!(job.is_paused());
        job.proceed();
        assert!(!job.is_paused());

        job.cancel();
        job.cancel();
        assert!(job.is_cancelled());
        assert_eq!(JobStatus::Cancelled, job.status());
    }

    #[tokio::test]
    async fn cancellable_wrapper_short_circuits_on_cancel() {
        struct StuckJob {
            state: JobState,
        }

        #[async_trait::async_trait]
        impl Job for StuckJob {
            fn rank(&self) -> i64 {
                0
            }

            fn name(&self) -> &str {
                "stuck"
            }

            fn state(&self) -> &JobState {
                &self.state
            }

            fn is_async(&self) -> bool {
                true
            }

            async fn run_async(&self) -> Result<(), JobError> {
                std::future::pending().await
            }
        }

        let job = Arc::new(StuckJob {
            state: JobState::new(),
        });
        let runner = {
            let job = job.clone();
            tokio::spawn(async move { job.run_async_cancellable().await })
        };

        job.cancel();
        runner.await.unwrap().unwrap();
        assert!(job.is_cancelled());
    }
}
