#![allow(dead_code)]

pub mod http_server;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use vdm_core::config::{HttpConfig, PoolConfig, ProgressConfig};
use vdm_core::progress::ProgressSink;
use vdm_core::retry::RetryPolicy;
use vdm_core::staging::StagingArea;
use vdm_core::store::JobDb;
use vdm_core::{JobId, JobStatus, Pipeline, WorkerPool};

/// Scratch state for one test: database, staging and download directories.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub db: JobDb,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = JobDb::open_at(dir.path().join("state/jobs.db")).await.unwrap();
        Self { dir, db }
    }

    pub fn staging_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("staging")
    }

    pub fn download_path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join("downloads").join(name)
    }

    /// Pipeline with short retry delays and a short stall timeout.
    pub fn pipeline(&self, sink: Arc<dyn ProgressSink>, retry: RetryPolicy) -> Pipeline {
        Pipeline::new(self.db.clone(), StagingArea::new(self.staging_dir()), sink)
            .with_retry(retry)
            .with_http(HttpConfig {
                connect_timeout_secs: 5,
                stall_timeout_secs: 10,
                ..HttpConfig::default()
            })
            .with_progress(ProgressConfig {
                interval_ms: 50,
                threshold_percent: 5,
            })
    }

    pub fn pool(
        &self,
        sink: Arc<dyn ProgressSink>,
        retry: RetryPolicy,
        workers: usize,
        queue_capacity: usize,
    ) -> WorkerPool {
        let cfg = PoolConfig {
            workers,
            queue_capacity,
            cancel_wait_ms: 2000,
        };
        WorkerPool::new(&cfg, Arc::new(self.pipeline(sink, retry)))
    }

    pub async fn status(&self, id: JobId) -> JobStatus {
        self.db.get_job(id).await.unwrap().unwrap().status
    }
}

pub fn retry(max_attempts: u32, delay_ms: u64) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        delay: Duration::from_millis(delay_ms),
    }
}

/// Number of entries in a directory (0 if it does not exist).
pub fn dir_entries(path: &Path) -> usize {
    std::fs::read_dir(path).map(|d| d.count()).unwrap_or(0)
}
