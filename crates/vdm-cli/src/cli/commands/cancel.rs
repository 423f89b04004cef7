//! `vdm cancel <id>` – cancel a job. If `vdm run` is active, the request goes
//! over its control socket; otherwise a pending job is marked failed directly.

use anyhow::{bail, Result};
use vdm_core::control::default_control_socket_path;
use vdm_core::store::JobDb;
use vdm_core::JobStatus;

use crate::cli::control_socket;

pub async fn run_cancel(db: &JobDb, id: i64) -> Result<()> {
    if let Ok(path) = default_control_socket_path() {
        match control_socket::send_cancel(&path, id).await {
            Ok(Some(true)) => {
                println!("Cancel requested for job {id}");
                return Ok(());
            }
            Ok(Some(false)) => tracing::debug!(id, "runner does not know the job"),
            Ok(None) => {}
            Err(e) => tracing::debug!("control socket: {:#}", e),
        }
    }

    let Some(job) = db.get_job(id).await? else {
        bail!("job {id} not found");
    };
    if job.status != JobStatus::Pending {
        bail!("job {id} is {}, not queued or running", job.status);
    }
    db.update_status(id, JobStatus::Failed, Some("canceled")).await?;
    println!("Canceled job {id}");
    Ok(())
}
