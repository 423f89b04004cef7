//! Background task that turns transfer snapshots into throttled notifications.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::warn;

use super::fetch::FetchProgress;
use crate::job::JobId;
use crate::progress::{percent_of, ProgressReporter, ProgressSink};
use crate::store::JobDb;

/// Receive snapshots until the transfer side hangs up, persisting the
/// declared size once and every emitted percentage. Hands the reporter back
/// so the pipeline keeps throttling state across steps.
pub(super) async fn run_progress_worker(
    mut rx: mpsc::Receiver<FetchProgress>,
    mut reporter: ProgressReporter,
    db: JobDb,
    sink: Arc<dyn ProgressSink>,
    job_id: JobId,
) -> ProgressReporter {
    let mut size_recorded = false;
    while let Some(snapshot) = rx.recv().await {
        if let (false, Some(total)) = (size_recorded, snapshot.total) {
            size_recorded = true;
            if let Err(e) = db.update_size(job_id, total).await {
                warn!(job_id, "size update failed: {e:#}");
            }
        }
        let percent = percent_of(snapshot.received, snapshot.total);
        if let Some(update) = reporter.observe_progress(percent, Instant::now()) {
            if let Err(e) = db.update_progress(job_id, update.percent).await {
                warn!(job_id, "progress update failed: {e:#}");
            }
            sink.notify(job_id, update.percent, update.status);
        }
    }
    reporter
}
