//! `vdm retry <id>` – reset a failed job so the next `vdm run` picks it up.

use anyhow::{bail, Result};
use vdm_core::store::JobDb;

pub async fn run_retry(db: &JobDb, id: i64) -> Result<()> {
    if db.reset_for_retry(id).await? {
        println!("Job {id} reset to pending");
        return Ok(());
    }
    match db.get_job(id).await? {
        None => bail!("job {id} not found"),
        Some(job) => bail!("job {id} is {}, only failed jobs can be retried", job.status),
    }
}
