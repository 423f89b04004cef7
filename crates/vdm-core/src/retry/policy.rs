use crate::config::RetryConfig;
use std::time::Duration;

/// High-level classification of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection errors, timeouts, non-2xx responses, staging write errors.
    Transient,
    /// Checksum mismatch, missing or unparsable checksum entry, unsupported algorithm.
    Integrity,
    /// Stop or user cancel. Never counted as an attempt.
    Canceled,
    /// Cannot create directories or the staging file, or the final move failed.
    Filesystem,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Bounded attempts with a fixed delay between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            delay: Duration::from_millis(cfg.delay_ms),
        }
    }
}

impl RetryPolicy {
    /// `attempt` is 1-based (1 = first attempt) and names the attempt that just failed.
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if !kind.is_retryable() || attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }
        RetryDecision::RetryAfter(self.delay)
    }
}
