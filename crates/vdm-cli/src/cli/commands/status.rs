//! `vdm status` – show status of all jobs.

use anyhow::Result;
use vdm_core::store::JobDb;

pub async fn run_status(db: &JobDb) -> Result<()> {
    let jobs = db.list_jobs().await?;
    if jobs.is_empty() {
        println!("No jobs in database.");
        return Ok(());
    }
    println!(
        "{:<6} {:<12} {:>4} {:>12}  {}",
        "ID", "STATUS", "%", "SIZE", "URL"
    );
    for j in jobs {
        let size_str = j
            .size
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} {:<12} {:>4} {:>12}  {}",
            j.id, j.status, j.progress, size_str, j.url
        );
        if let Some(err) = j.error {
            println!("       error: {err}");
        }
    }
    Ok(())
}
