//! Job queue, worker pool and the per-job capture pipeline.

pub mod job;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod runs;
pub mod worker;

pub use job::{EnqueueOptions, JobPayload};
pub use pipeline::JobPipeline;
pub use queue::{JobQueue, LeasedJob, QueueConfig};
pub use runs::{create_run, RunRequest};
pub use worker::{WorkerConfig, WorkerPool};
