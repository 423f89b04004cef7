//! One execution of the pipeline state machine for a single job.

use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::fetch::fetch_to_staging;
use super::progress_worker::run_progress_worker;
use super::{Pipeline, PipelineError, RunOutcome};
use crate::control::CancelToken;
use crate::job::{Job, JobStatus};
use crate::progress::ProgressReporter;
use crate::retry::{ErrorKind, RetryDecision};
use crate::staging::StagingFile;

const CANCELED: &str = "canceled";

/// Buffered transfer snapshots between the blocking fetch and the progress worker.
const PROGRESS_CHANNEL: usize = 64;

pub(super) struct Execution<'p> {
    pub(super) pipeline: &'p Pipeline,
    pub(super) job: Job,
    pub(super) status: JobStatus,
    pub(super) reporter: ProgressReporter,
    pub(super) cancel: CancelToken,
}

impl<'p> Execution<'p> {
    pub(super) fn new(
        pipeline: &'p Pipeline,
        job: Job,
        reporter: ProgressReporter,
        cancel: CancelToken,
    ) -> Self {
        let status = job.status;
        Self {
            pipeline,
            job,
            status,
            reporter,
            cancel,
        }
    }

    /// Attempt loop: run attempts until success, a terminal error, an
    /// exhausted retry budget, or cancellation.
    pub(super) async fn drive(mut self) -> RunOutcome {
        let job_id = self.job.id;
        let max_attempts = self.pipeline.retry.max_attempts;
        info!(job_id, url = %self.job.url, "job started");

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.record_attempts(attempt).await;

            let err = match self.attempt().await {
                Ok(()) => {
                    info!(job_id, dest = %self.job.destination.display(), "job complete");
                    return RunOutcome::Completed;
                }
                Err(e) => e,
            };

            let kind = err.kind();
            if kind == ErrorKind::Canceled {
                self.record_attempts(attempt - 1).await;
                return self.finish_canceled().await;
            }

            match self.pipeline.retry.decide(attempt, kind) {
                RetryDecision::RetryAfter(delay) => {
                    // The job stays in its active status; the note only goes
                    // to the error field so nothing terminal is observed.
                    let message =
                        format!("attempt {attempt}/{max_attempts} failed: {err}; retrying");
                    warn!(job_id, ?delay, "{message}");
                    if let Err(e) = self.note_retry(&message).await {
                        return self.finish_failed(e.to_string()).await;
                    }

                    let cancel = self.cancel.clone();
                    let canceled = tokio::select! {
                        _ = cancel.canceled() => true,
                        _ = tokio::time::sleep(delay) => false,
                    };
                    if canceled {
                        return self.finish_canceled().await;
                    }
                }
                RetryDecision::NoRetry => {
                    let message = if kind == ErrorKind::Transient {
                        format!("{err} (after {attempt} attempts)")
                    } else {
                        err.to_string()
                    };
                    warn!(job_id, ?kind, "job failed: {message}");
                    return self.finish_failed(message).await;
                }
            }
        }
    }

    /// Pending -> Downloading -> (Verifying ->) Complete.
    async fn attempt(&mut self) -> Result<(), PipelineError> {
        self.ensure_active()?;
        self.enter_downloading().await?;

        let staging = self.create_staging().await?;
        let (staging, received) = self.fetch(staging).await?;
        debug!(job_id = self.job.id, received, "fetch finished");
        self.pipeline
            .db
            .update_size(self.job.id, received)
            .await
            .map_err(PipelineError::Store)?;

        if let Some(checksum_url) = self.job.checksum_url.clone() {
            self.ensure_active()?;
            let percent = self.reporter.percent();
            self.set_status(JobStatus::Verifying, None, percent).await?;
            self.verify(&staging, &checksum_url).await?;
        }

        self.ensure_active()?;
        self.finalize(staging).await?;
        self.set_status(JobStatus::Complete, None, 100).await
    }

    /// Start of an attempt. The first one leaves Pending; later ones re-enter
    /// Downloading from Verifying or stay in Downloading. Reported progress is
    /// not reset, so observers never see it go backwards.
    async fn enter_downloading(&mut self) -> Result<(), PipelineError> {
        match self.status {
            JobStatus::Pending => self.set_status(JobStatus::Downloading, None, 0).await,
            JobStatus::Downloading => self
                .pipeline
                .db
                .update_status(self.job.id, JobStatus::Downloading, None)
                .await
                .map_err(PipelineError::Store),
            _ => {
                let percent = self.reporter.percent();
                self.set_status(JobStatus::Downloading, None, percent).await
            }
        }
    }

    /// Record a retry note against the current, still active, status.
    async fn note_retry(&self, message: &str) -> Result<(), PipelineError> {
        self.pipeline
            .db
            .update_status(self.job.id, self.status, Some(message))
            .await
            .map_err(PipelineError::Store)
    }

    fn ensure_active(&self) -> Result<(), PipelineError> {
        if self.cancel.is_canceled() {
            return Err(PipelineError::Canceled);
        }
        Ok(())
    }

    async fn create_staging(&self) -> Result<StagingFile, PipelineError> {
        let area = self.pipeline.staging.clone();
        let job_id = self.job.id;
        tokio::task::spawn_blocking(move || area.create(job_id))
            .await?
            .map_err(PipelineError::Filesystem)
    }

    /// Run the blocking transfer while a progress worker owns the reporter.
    async fn fetch(&mut self, mut staging: StagingFile) -> Result<(StagingFile, u64), PipelineError> {
        let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL);
        let fresh = ProgressReporter::from_config(&self.pipeline.progress);
        let reporter = std::mem::replace(&mut self.reporter, fresh);
        let worker = tokio::spawn(run_progress_worker(
            rx,
            reporter,
            self.pipeline.db.clone(),
            self.pipeline.sink.clone(),
            self.job.id,
        ));

        let url = self.job.url.clone();
        let http = self.pipeline.http.clone();
        let cancel = self.cancel.clone();
        // The sender lives inside the closure; when the transfer ends the
        // worker drains what is left and returns.
        let transfer = tokio::task::spawn_blocking(move || {
            let received = fetch_to_staging(&url, &http, &mut staging, &cancel, &tx)?;
            Ok::<_, PipelineError>((staging, received))
        })
        .await;

        match worker.await {
            Ok(reporter) => self.reporter = reporter,
            Err(e) => warn!(job_id = self.job.id, "progress worker failed: {e}"),
        }
        transfer?
    }

    async fn finalize(&self, staging: StagingFile) -> Result<(), PipelineError> {
        let dest = self.job.destination.clone();
        tokio::task::spawn_blocking(move || staging.finalize(&dest))
            .await?
            .map_err(PipelineError::Filesystem)
    }

    /// Checked transition, persisted and surfaced through the reporter.
    pub(super) async fn set_status(
        &mut self,
        next: JobStatus,
        error: Option<&str>,
        percent: u8,
    ) -> Result<(), PipelineError> {
        let job_id = self.job.id;
        self.status.transition(next)?;
        self.pipeline
            .db
            .update_status(job_id, next, error)
            .await
            .map_err(PipelineError::Store)?;
        self.status = next;
        debug!(job_id, status = %next, "status changed");

        if let Some(update) = self.reporter.observe_status(next, percent, Instant::now()) {
            self.pipeline
                .db
                .update_progress(job_id, update.percent)
                .await
                .map_err(PipelineError::Store)?;
            self.pipeline.sink.notify(job_id, update.percent, update.status);
        }
        Ok(())
    }

    async fn record_attempts(&self, attempts: u32) {
        if let Err(e) = self.pipeline.db.update_attempts(self.job.id, attempts).await {
            warn!(job_id = self.job.id, "attempt count update failed: {e:#}");
        }
    }

    async fn finish_canceled(&mut self) -> RunOutcome {
        info!(job_id = self.job.id, "job canceled");
        self.record_failure(CANCELED).await;
        RunOutcome::Canceled
    }

    async fn finish_failed(&mut self, message: String) -> RunOutcome {
        self.record_failure(&message).await;
        RunOutcome::Failed(message)
    }

    /// Best effort: a failure to persist is only logged.
    async fn record_failure(&mut self, message: &str) {
        let percent = self.reporter.percent();
        if let Err(e) = self.set_status(JobStatus::Failed, Some(message), percent).await {
            warn!(job_id = self.job.id, "cannot record failure '{message}': {e}");
        }
    }
}
