//! This crate implements a prioritized, cancellable job queue with a single
//! batching consumer, plus a bounded completion service that caps how many
//! jobs are in flight at once and hands finished jobs back to the caller.
//!
//! This is intended for background work such as folder or account
//! synchronization: many (async) tasks construct jobs and submit them, one
//! dedicated consumer drains and dispatches them, and a separate caller
//! collects finished jobs without any other synchronization.
//!
//! note: Other rust job queues investigated either did not support waiting
//! for finished work or else were overly complicated, requiring a backend
//! database, etc.
//!
//! # jobs
//!
//! Any type that implements the [Job](traits::Job) trait may be a job.  Jobs
//! may be of mixed (heterogenous) types in a single [JobQueue] instance.
//!
//! Both blocking and non-blocking (async) jobs are supported.  Blocking jobs
//! are called inside spawn_blocking() in order to execute on tokio's
//! blocking thread-pool.  Async jobs are simply awaited.
//!
//! Each job carries an integer rank.  Lower rank runs first.  Within one
//! drained batch the consumer executes jobs in non-decreasing rank order;
//! the batch sort is stable, so jobs of equal rank happen to keep their
//! submission order within a batch, but that is an implementation detail and
//! not a guarantee.
//!
//! # batching and its ordering trade-off
//!
//! The consumer drains the whole buffer into a local batch in one go,
//! bounding lock contention.  Priority reordering takes effect between
//! batches rather than within one, so there is no global priority order: a
//! low-rank job submitted just after a drain can execute before a high-rank
//! job that lands in the very next batch.  This weak ordering is accepted
//! and by now relied upon; do not tighten it without checking the callers.
//!
//! # cancellation and pause
//!
//! Cancellation is cooperative.  [cancel](traits::Job::cancel) flips a flag
//! and nothing more: a job still buffered is discarded at the next drain,
//! and a job already executing is expected to notice the flag at its own
//! safe points.  Cancelling twice is a no-op.
//!
//! A job may also be paused, the cooperative back-off for work whose
//! upstream dependency is not ready.  The consumer never executes a paused
//! job; it clears the pause flag and re-offers the job to the buffer for a
//! later batch, trusting the job to pause itself again if it is still not
//! ready.
//!
//! # capacity and admission
//!
//! The queue buffer has a fixed capacity (default `1 << 20`) and
//! [submit](queue::JobQueue::submit) fails fast with `false` at that bound.
//! That bound is a last-resort safety valve; real admission control is the
//! [JobCompletionService], which caps concurrently in-flight jobs with a
//! semaphore and surfaces each finished job exactly once through
//! [take](completion_service::JobCompletionService::take) /
//! [poll](completion_service::JobCompletionService::poll).
//!
//! # shutdown
//!
//! [stop](queue::JobQueue::stop) feeds a poison sentinel through the normal
//! insertion path, lets the consumer finish the batch the sentinel was
//! drained with, and waits up to a configurable grace period (default 1
//! second) before aborting the consumer task.  `stop()` never errors and
//! repeat calls are no-ops.
//!
//! ## hello job-queue world.
//!
//! Here we demonstrate the most basic usage by creating a `HelloJob` and
//! running it once through the queue and completion service.
//!
//! We choose an async job for this example because it's a little bit
//! simpler.  We don't have to check for job-cancellation in the job itself.
//!
//! ```
//! use std::sync::Arc;
//!
//! use job_queue::Job;
//! use job_queue::JobCompletionService;
//! use job_queue::JobError;
//! use job_queue::JobQueue;
//! use job_queue::JobState;
//! use job_queue::QueueConfig;
//!
//! // define our custom job type that just greets someone
//! pub struct HelloJob {
//!     who: String,
//!     state: JobState,
//! }
//!
//! // implement Job trait.
//! #[async_trait::async_trait]
//! impl Job for HelloJob {
//!     // lower rank runs first
//!     fn rank(&self) -> i64 {
//!         1
//!     }
//!
//!     fn name(&self) -> &str {
//!         "hello"
//!     }
//!
//!     fn state(&self) -> &JobState {
//!         &self.state
//!     }
//!
//!     // indicate that we are an async Job
//!     fn is_async(&self) -> bool {
//!         true
//!     }
//!
//!     // as an async job we must impl run_async()
//!     async fn run_async(&self) -> Result<(), JobError> {
//!         println!("hello {}", self.who);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // start the JobQueue running.
//!     let queue = Arc::new(JobQueue::start(QueueConfig::default()));
//!
//!     // admit at most 4 jobs into the queue at a time.
//!     let service = JobCompletionService::new(queue.clone(), 4);
//!
//!     let job = Arc::new(HelloJob {
//!         who: "world".to_string(),
//!         state: JobState::new(),
//!     });
//!     assert!(service.submit(job).await);
//!
//!     // await the finished (original) job
//!     let finished = service.take().await;
//!     assert_eq!("hello", finished.name());
//!
//!     queue.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## a blocking job.
//!
//! The example job finds all the prime numbers in a provided range.  We
//! create 100 jobs, each searching a range of 100 numbers, so the first
//! 10000 integers are searched by all jobs together.
//!
//! A blocking job must poll for cancellation in its main processing loop;
//! that is the only consideration beyond returning `false` from
//! `is_async()`.
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::Mutex;
//!
//! use job_queue::Job;
//! use job_queue::JobCompletionService;
//! use job_queue::JobError;
//! use job_queue::JobQueue;
//! use job_queue::JobState;
//! use job_queue::QueueConfig;
//!
//! // define our custom job type that finds prime numbers within a range
//! struct FindPrimesJob {
//!     start: u64,
//!     len: u64,
//!     state: JobState,
//!     found: Arc<Mutex<Vec<u64>>>,
//! }
//!
//! impl FindPrimesJob {
//!     fn is_prime(num: u64) -> bool {
//!         if num <= 1 {
//!             return false;
//!         }
//!         if num <= 3 {
//!             return true;
//!         }
//!         if num % 2 == 0 || num % 3 == 0 {
//!             return false;
//!         }
//!         let mut i = 5;
//!         while i * i <= num {
//!             if num % i == 0 || num % (i + 2) == 0 {
//!                 return false;
//!             }
//!             i += 6;
//!         }
//!         true
//!     }
//! }
//!
//! impl Job for FindPrimesJob {
//!     fn rank(&self) -> i64 {
//!         (self.start / 1000) as i64
//!     }
//!
//!     fn name(&self) -> &str {
//!         "find-primes"
//!     }
//!
//!     fn state(&self) -> &JobState {
//!         &self.state
//!     }
//!
//!     // we are *not* an async Job.
//!     fn is_async(&self) -> bool {
//!         false
//!     }
//!
//!     // as a blocking job we must impl the run() method
//!     fn run(&self) -> Result<(), JobError> {
//!         let mut primes = Vec::new();
//!
//!         // this is the main processing loop of our job, so it polls for
//!         // cancellation.  It could be more efficient and poll every 100
//!         // iterations or n milliseconds, etc.
//!         for num in self.start..self.start + self.len {
//!             if self.is_cancelled() {
//!                 return Ok(());
//!             }
//!             if Self::is_prime(num) {
//!                 primes.push(num);
//!             }
//!         }
//!
//!         self.found.lock().unwrap().extend(primes);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let queue = Arc::new(JobQueue::start(QueueConfig::default()));
//!     let service = JobCompletionService::new(queue.clone(), 8);
//!     let found = Arc::new(Mutex::new(Vec::new()));
//!
//!     // submit 100 jobs, each searching 100 numbers for primes.  submit()
//!     // waits whenever all 8 admission slots are taken.
//!     for n in 0..100u64 {
//!         let job = Arc::new(FindPrimesJob {
//!             start: n * 100,
//!             len: 100,
//!             state: JobState::new(),
//!             found: found.clone(),
//!         });
//!         assert!(service.submit(job).await);
//!     }
//!
//!     // collect all 100 finished jobs.
//!     for _ in 0..100 {
//!         let _finished = service.take().await;
//!     }
//!
//!     // 9973 is the largest prime number below 10000
//!     let primes = found.lock().unwrap();
//!     assert_eq!(Some(&9973), primes.iter().max());
//!
//!     queue.stop().await;
//!     Ok(())
//! }
//! ```

mod channels;
pub mod completion_service;
pub mod errors;
mod job_completion;
mod job_id;
mod job_state;
pub mod queue;
pub mod traits;
mod worker_pool;

pub use completion_service::JobCompletionService;
pub use errors::JobError;
pub use errors::PanicInfo;
pub use job_completion::JobCompletion;
pub use job_id::JobId;
pub use job_state::JobState;
pub use job_state::JobStatus;
pub use queue::JobQueue;
pub use queue::QueueConfig;
pub use traits::Job;
pub use worker_pool::WorkerPool;
