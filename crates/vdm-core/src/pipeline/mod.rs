//! Job pipeline: fetch -> (verify) -> finalize for one job, with retry and
//! cooperative cancellation.
//!
//! The pipeline is the only writer of a job's in-progress fields while it
//! runs. Every failure ends up in the job's error message; nothing propagates
//! to the worker that called [`Pipeline::run`].

mod error;
mod execution;
mod fetch;
mod progress_worker;
mod verify;

pub use error::PipelineError;

use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::config::{HttpConfig, ProgressConfig, VdmConfig};
use crate::control::CancelToken;
use crate::job::{JobId, JobStatus};
use crate::progress::{ProgressReporter, ProgressSink};
use crate::retry::RetryPolicy;
use crate::staging::StagingArea;
use crate::store::JobDb;

use self::execution::Execution;

/// Checksum resources larger than this are rejected.
pub const CHECKSUM_TEXT_LIMIT: usize = 1024 * 1024;

/// How a [`Pipeline::run`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Terminal failure; carries the stored error message.
    Failed(String),
    Canceled,
    /// The job was missing or not Pending, so nothing ran.
    Skipped,
}

impl RunOutcome {
    /// Terminal status a finished run left behind, if it ran at all.
    pub fn status(&self) -> Option<JobStatus> {
        match self {
            RunOutcome::Completed => Some(JobStatus::Complete),
            RunOutcome::Failed(_) | RunOutcome::Canceled => Some(JobStatus::Failed),
            RunOutcome::Skipped => None,
        }
    }
}

/// Shared, immutable pipeline configuration plus its collaborators.
pub struct Pipeline {
    db: JobDb,
    sink: Arc<dyn ProgressSink>,
    staging: StagingArea,
    http: HttpConfig,
    retry: RetryPolicy,
    progress: ProgressConfig,
}

impl Pipeline {
    /// Pipeline with default HTTP, retry and progress settings.
    pub fn new(db: JobDb, staging: StagingArea, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            db,
            sink,
            staging,
            http: HttpConfig::default(),
            retry: RetryPolicy::default(),
            progress: ProgressConfig::default(),
        }
    }

    /// Pipeline configured from the `[http]`, `[retry]` and `[progress]` sections.
    pub fn from_config(db: JobDb, sink: Arc<dyn ProgressSink>, cfg: &VdmConfig) -> Result<Self> {
        Ok(Self::new(db, StagingArea::new(cfg.staging_dir()?), sink)
            .with_http(cfg.http.clone())
            .with_retry(RetryPolicy::from(&cfg.retry))
            .with_progress(cfg.progress.clone()))
    }

    pub fn with_http(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress(mut self, progress: ProgressConfig) -> Self {
        self.progress = progress;
        self
    }

    pub fn db(&self) -> &JobDb {
        &self.db
    }

    /// Execute one job to a terminal status.
    ///
    /// The job is re-read from the store first; a deleted job or one that is
    /// no longer Pending is skipped.
    pub async fn run(&self, job_id: JobId, cancel: &CancelToken) -> RunOutcome {
        let job = match self.db.get_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id, "job vanished before it could run");
                return RunOutcome::Skipped;
            }
            Err(e) => {
                warn!(job_id, "cannot load job: {e:#}");
                return RunOutcome::Skipped;
            }
        };
        if job.status != JobStatus::Pending {
            warn!(job_id, status = %job.status, "job is not pending, skipping");
            return RunOutcome::Skipped;
        }
        let reporter = ProgressReporter::from_config(&self.progress);
        Execution::new(self, job, reporter, cancel.clone()).drive().await
    }
}
