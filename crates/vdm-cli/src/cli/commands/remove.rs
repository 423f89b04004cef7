//! `vdm remove <id>` – remove a job; optionally delete its file with --delete-file.

use anyhow::{bail, Result};
use vdm_core::store::JobDb;
use vdm_core::JobStatus;

/// Removes the job from the DB. With `delete_file`, a completed job's
/// destination file is deleted too.
pub async fn run_remove(db: &JobDb, id: i64, delete_file: bool) -> Result<()> {
    let Some(job) = db.get_job(id).await? else {
        bail!("job {id} not found");
    };
    if matches!(job.status, JobStatus::Downloading | JobStatus::Verifying) {
        bail!("job {id} is {}; cancel it first", job.status);
    }

    if delete_file && job.status == JobStatus::Complete {
        let path = &job.destination;
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "deleted file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), "could not delete file: {}", e),
        }
    }

    db.delete_job(id).await?;
    println!("Removed job {id}");
    Ok(())
}
