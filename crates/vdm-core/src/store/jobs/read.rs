//! Job read operations.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::path::PathBuf;

use super::super::db::JobDb;
use crate::job::{ChecksumRecord, Job, JobId, JobStatus};

const JOB_COLUMNS: &str = r#"
    id, url, checksum_url, checksum_algorithm, destination, size, status,
    progress, error, digest_algorithm, digest_expected, digest_computed,
    attempts, created_at, completed_at
"#;

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let status_str: String = row.get("status");
    let status: JobStatus = status_str.parse()?;
    let destination: String = row.get("destination");
    let progress: i64 = row.get("progress");
    let attempts: i64 = row.get("attempts");

    let digest_algorithm: Option<String> = row.get("digest_algorithm");
    let digest_expected: Option<String> = row.get("digest_expected");
    let digest_computed: Option<String> = row.get("digest_computed");
    let checksum = match (digest_algorithm, digest_expected, digest_computed) {
        (Some(algorithm), Some(expected), Some(computed)) => Some(ChecksumRecord {
            algorithm,
            expected,
            computed,
        }),
        _ => None,
    };

    Ok(Job {
        id: row.get("id"),
        url: row.get("url"),
        checksum_url: row.get("checksum_url"),
        checksum_algorithm: row.get("checksum_algorithm"),
        destination: PathBuf::from(destination),
        size: row.get("size"),
        status,
        progress: progress.clamp(0, 100) as u8,
        error: row.get("error"),
        checksum,
        attempts: attempts.max(0) as u32,
        created_at: row.get("created_at"),
        completed_at: row.get("completed_at"),
    })
}

impl JobDb {
    /// Fetch a single job.
    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref()
            .map(job_from_row)
            .transpose()
            .with_context(|| format!("decode job {id}"))
    }

    /// All jobs, newest first.
    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    /// Pending jobs in submission order (oldest first).
    pub async fn pending_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 ORDER BY id ASC"
        ))
        .bind(JobStatus::Pending.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }
}
