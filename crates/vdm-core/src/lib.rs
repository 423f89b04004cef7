pub mod config;
pub mod logging;

pub mod checksum;
pub mod control;
pub mod hub;
pub mod job;
pub mod pipeline;
pub mod pool;
pub mod progress;
pub mod retry;
pub mod staging;
pub mod store;
pub mod url_model;

pub use job::{ChecksumRecord, Job, JobId, JobStatus, NewJob};
pub use pipeline::{Pipeline, PipelineError, RunOutcome};
pub use pool::{PoolError, WorkerPool};
pub use progress::ProgressSink;
