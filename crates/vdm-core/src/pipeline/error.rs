//! Pipeline error type and its mapping into the retry taxonomy.

use crate::checksum::ChecksumError;
use crate::job::InvalidTransition;
use crate::retry::ErrorKind;

/// Failure of one pipeline attempt.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Curl reported an error (timeout, connection, DNS, stalled transfer...).
    #[error("{0}")]
    Network(#[source] curl::Error),
    /// The server answered with a non-2xx status.
    #[error("HTTP {0}")]
    HttpStatus(u32),
    /// Writing a received chunk to the staging file failed.
    #[error("staging write failed: {0}")]
    StagingWrite(#[source] std::io::Error),
    /// The checksum resource exceeded the size cap.
    #[error("checksum file larger than {0} bytes")]
    ChecksumTooLarge(usize),
    /// The source URL has no filename to look up in the checksum file.
    #[error("cannot derive a source filename from {0}")]
    NoSourceFilename(String),
    #[error(transparent)]
    Checksum(#[from] ChecksumError),
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    Mismatch { expected: String, actual: String },
    #[error("canceled")]
    Canceled,
    /// Staging directory/file creation or the final move failed.
    #[error("{0:#}")]
    Filesystem(anyhow::Error),
    /// Persisting job state failed.
    #[error("store: {0:#}")]
    Store(anyhow::Error),
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
    /// A blocking step panicked or was torn down.
    #[error("internal: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Network(_)
            | PipelineError::HttpStatus(_)
            | PipelineError::StagingWrite(_) => ErrorKind::Transient,
            PipelineError::ChecksumTooLarge(_)
            | PipelineError::NoSourceFilename(_)
            | PipelineError::Mismatch { .. } => ErrorKind::Integrity,
            PipelineError::Checksum(ChecksumError::Io { .. }) => ErrorKind::Filesystem,
            PipelineError::Checksum(_) => ErrorKind::Integrity,
            PipelineError::Canceled => ErrorKind::Canceled,
            PipelineError::Filesystem(_)
            | PipelineError::Store(_)
            | PipelineError::Transition(_)
            | PipelineError::Internal(_) => ErrorKind::Filesystem,
        }
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(e: tokio::task::JoinError) -> Self {
        PipelineError::Internal(e.to_string())
    }
}
