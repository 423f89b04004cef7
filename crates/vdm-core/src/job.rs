//! Job model: identifiers, status state machine, and the persisted record.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Job identifier (SQLite row id).
pub type JobId = i64;

/// Lifecycle status of a job.
///
/// Allowed edges: Pending → Downloading → (Verifying →) Complete, any active
/// status → Failed, Verifying → Downloading when a transient verify failure
/// starts a new automatic attempt, and Failed → Pending via an explicit retry.
/// Automatic retries never pass through Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Downloading,
    Verifying,
    Complete,
    Failed,
}

/// A status change that the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid status transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Downloading => "downloading",
            JobStatus::Verifying => "verifying",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    /// Complete and Failed are terminal: only a retry moves a job out of Failed.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Downloading)
                | (Pending, Failed)
                | (Downloading, Verifying)
                | (Downloading, Complete)
                | (Downloading, Failed)
                | (Verifying, Complete)
                | (Verifying, Failed)
                | (Verifying, Downloading)
                | (Failed, Pending)
        )
    }

    /// Returns `next` if the edge is allowed.
    pub fn transition(self, next: JobStatus) -> Result<JobStatus, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "downloading" => Ok(JobStatus::Downloading),
            "verifying" => Ok(JobStatus::Verifying),
            "complete" => Ok(JobStatus::Complete),
            "failed" => Ok(JobStatus::Failed),
            other => anyhow::bail!("unknown job status '{}'", other),
        }
    }
}

/// Input for creating a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub url: String,
    pub checksum_url: Option<String>,
    /// Algorithm tag such as "sha256"; `None` means the default algorithm.
    pub checksum_algorithm: Option<String>,
    pub destination: PathBuf,
}

impl NewJob {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            checksum_url: None,
            checksum_algorithm: None,
            destination: destination.into(),
        }
    }

    pub fn with_checksum(mut self, checksum_url: impl Into<String>, algorithm: Option<&str>) -> Self {
        self.checksum_url = Some(checksum_url.into());
        self.checksum_algorithm = algorithm.map(str::to_string);
        self
    }
}

/// (algorithm, expected, computed) recorded after the verify step consumed a checksum source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumRecord {
    pub algorithm: String,
    pub expected: String,
    pub computed: String,
}

/// Full job record as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub url: String,
    pub checksum_url: Option<String>,
    pub checksum_algorithm: Option<String>,
    pub destination: PathBuf,
    /// Declared size once known, replaced by the received byte count on success.
    pub size: Option<i64>,
    pub status: JobStatus,
    /// 0..=100
    pub progress: u8,
    pub error: Option<String>,
    pub checksum: Option<ChecksumRecord>,
    /// Fetch attempts made in the latest execution.
    pub attempts: u32,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}
