//! Progress notification capability and the throttle that decides when to use it.

use crate::config::ProgressConfig;
use crate::job::{JobId, JobStatus};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Receives progress notifications from the pipeline.
///
/// Implemented by the hub handle; the pipeline never talks to a transport directly.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, job_id: JobId, percent: u8, status: JobStatus);
}

impl<T: ProgressSink + ?Sized> ProgressSink for Arc<T> {
    fn notify(&self, job_id: JobId, percent: u8, status: JobStatus) {
        (**self).notify(job_id, percent, status)
    }
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn notify(&self, _job_id: JobId, _percent: u8, _status: JobStatus) {}
}

/// Sink that keeps every notification in memory. Useful for tests and for
/// callers that want to inspect a job's history after the fact.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(JobId, u8, JobStatus)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(JobId, u8, JobStatus)> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn events_for(&self, job_id: JobId) -> Vec<(u8, JobStatus)> {
        self.events()
            .into_iter()
            .filter(|(id, _, _)| *id == job_id)
            .map(|(_, p, s)| (p, s))
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn notify(&self, job_id: JobId, percent: u8, status: JobStatus) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((job_id, percent, status));
    }
}

/// A notification the reporter decided to surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Copy)]
struct Emission {
    at: Instant,
    percent: u8,
    status: JobStatus,
}

/// Throttle for one pipeline execution.
///
/// Status changes are always emitted. Progress within a status is emitted when
/// the interval has elapsed since the last emission or the percentage moved by
/// at least the threshold. Progress never goes backwards while Downloading.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    interval: Duration,
    threshold: u8,
    last: Option<Emission>,
}

impl ProgressReporter {
    pub fn new(interval: Duration, threshold: u8) -> Self {
        Self {
            interval,
            threshold: threshold.max(1),
            last: None,
        }
    }

    pub fn from_config(cfg: &ProgressConfig) -> Self {
        Self::new(Duration::from_millis(cfg.interval_ms), cfg.threshold_percent)
    }

    /// Last emitted percentage (0 before anything was emitted).
    pub fn percent(&self) -> u8 {
        self.last.map(|e| e.percent).unwrap_or(0)
    }

    pub fn status(&self) -> Option<JobStatus> {
        self.last.map(|e| e.status)
    }

    /// Record a status change. Entering a status always emits; repeating the
    /// current status emits only if the percentage differs.
    pub fn observe_status(
        &mut self,
        status: JobStatus,
        percent: u8,
        now: Instant,
    ) -> Option<ProgressUpdate> {
        let percent = percent.min(100);
        if let Some(last) = self.last {
            if last.status == status && last.percent == percent {
                return None;
            }
        }
        Some(self.emit(status, percent, now))
    }

    /// Record a progress sample for the current status.
    pub fn observe_progress(&mut self, percent: u8, now: Instant) -> Option<ProgressUpdate> {
        let last = self.last?;
        let percent = percent.min(100).max(last.percent);
        if percent == last.percent {
            return None;
        }
        let elapsed = now.saturating_duration_since(last.at);
        if elapsed >= self.interval || percent - last.percent >= self.threshold {
            return Some(self.emit(last.status, percent, now));
        }
        None
    }

    fn emit(&mut self, status: JobStatus, percent: u8, now: Instant) -> ProgressUpdate {
        self.last = Some(Emission {
            at: now,
            percent,
            status,
        });
        ProgressUpdate { percent, status }
    }
}

/// Percentage of `done` out of `total`, rounded down; 0 when the total is unknown.
pub fn percent_of(done: u64, total: Option<u64>) -> u8 {
    match total {
        Some(t) if t > 0 => ((done.min(t) as u128 * 100) / t as u128) as u8,
        _ => 0,
    }
}
