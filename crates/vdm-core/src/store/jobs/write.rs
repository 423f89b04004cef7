//! Job write operations: create, per-field updates, retry reset, removal.

use anyhow::Result;

use super::super::db::{unix_timestamp, JobDb};
use crate::job::{ChecksumRecord, JobId, JobStatus, NewJob};

impl JobDb {
    /// Insert a new Pending job and return its id.
    pub async fn create_job(&self, job: &NewJob) -> Result<JobId> {
        let now = unix_timestamp();
        let id = sqlx::query(
            r#"
            INSERT INTO jobs (
                url, checksum_url, checksum_algorithm, destination,
                status, progress, attempts, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6, ?6)
            "#,
        )
        .bind(&job.url)
        .bind(&job.checksum_url)
        .bind(&job.checksum_algorithm)
        .bind(job.destination.to_string_lossy().into_owned())
        .bind(JobStatus::Pending.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    /// Set status and error message. Terminal statuses stamp `completed_at`;
    /// any other status clears it.
    pub async fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let now = unix_timestamp();
        let completed_at = status.is_terminal().then_some(now);
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?1,
                error = ?2,
                completed_at = ?3,
                updated_at = ?4
            WHERE id = ?5
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(completed_at)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_progress(&self, id: JobId, percent: u8) -> Result<()> {
        sqlx::query("UPDATE jobs SET progress = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(i64::from(percent.min(100)))
            .bind(unix_timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_size(&self, id: JobId, bytes: u64) -> Result<()> {
        sqlx::query("UPDATE jobs SET size = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(i64::try_from(bytes).unwrap_or(i64::MAX))
            .bind(unix_timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_checksum(&self, id: JobId, record: &ChecksumRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET digest_algorithm = ?1,
                digest_expected = ?2,
                digest_computed = ?3,
                updated_at = ?4
            WHERE id = ?5
            "#,
        )
        .bind(&record.algorithm)
        .bind(&record.expected)
        .bind(&record.computed)
        .bind(unix_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_attempts(&self, id: JobId, attempts: u32) -> Result<()> {
        sqlx::query("UPDATE jobs SET attempts = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(i64::from(attempts))
            .bind(unix_timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Failed -> Pending with progress, error, attempts and checksum cleared.
    /// Returns false (and changes nothing) if the job is not Failed.
    pub async fn reset_for_retry(&self, id: JobId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?1,
                progress = 0,
                error = NULL,
                attempts = 0,
                digest_algorithm = NULL,
                digest_expected = NULL,
                digest_computed = NULL,
                completed_at = NULL,
                updated_at = ?2
            WHERE id = ?3 AND status = ?4
            "#,
        )
        .bind(JobStatus::Pending.as_str())
        .bind(unix_timestamp())
        .bind(id)
        .bind(JobStatus::Failed.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Reset jobs left Downloading or Verifying by a crash back to Pending.
    /// Returns the number of jobs recovered.
    pub async fn recover_interrupted_jobs(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?1,
                progress = 0,
                updated_at = ?2
            WHERE status IN (?3, ?4)
            "#,
        )
        .bind(JobStatus::Pending.as_str())
        .bind(unix_timestamp())
        .bind(JobStatus::Downloading.as_str())
        .bind(JobStatus::Verifying.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Remove a job. Returns whether a row was deleted.
    pub async fn delete_job(&self, id: JobId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
