//! Worker pool: N long-lived workers draining a bounded job queue.
//!
//! `submit` blocks while the queue is full, which is the only backpressure
//! in the system. Each job runs in its own task so a panic in one pipeline is
//! recorded against that job and the worker carries on.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::control::JobControl;
use crate::job::{JobId, JobStatus, NewJob};
use crate::pipeline::Pipeline;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("pool stopped")]
    Stopped,
    #[error("job {0} is already queued or running")]
    AlreadyQueued(JobId),
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {0} is not failed")]
    NotFailed(JobId),
    #[error("store: {0:#}")]
    Store(#[from] anyhow::Error),
}

struct Inner {
    pipeline: Arc<Pipeline>,
    control: JobControl,
    tx: mpsc::Sender<JobId>,
    rx: tokio::sync::Mutex<mpsc::Receiver<JobId>>,
    /// Jobs submitted and not yet finished (queued or running).
    active: Mutex<HashSet<JobId>>,
    idle: Notify,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
    worker_count: usize,
    cancel_wait: Duration,
}

impl Inner {
    fn active(&self) -> MutexGuard<'_, HashSet<JobId>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Forget a finished (or never enqueued) job and wake idle waiters.
    fn release(&self, job_id: JobId) {
        let mut active = self.active();
        self.control.unregister(job_id);
        active.remove(&job_id);
        if active.is_empty() {
            self.idle.notify_waiters();
        }
    }
}

/// Aborts the wrapped task when dropped, so aborting a worker also tears down
/// the job it was running.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Fixed-size pool of workers executing the job pipeline.
pub struct WorkerPool {
    inner: Arc<Inner>,
}

impl WorkerPool {
    /// Create the pool and its bounded queue. Jobs may be submitted before
    /// [`start`](Self::start); they wait in the queue (and apply backpressure).
    pub fn new(config: &PoolConfig, pipeline: Arc<Pipeline>) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                pipeline,
                control: JobControl::new(),
                tx,
                rx: tokio::sync::Mutex::new(rx),
                active: Mutex::new(HashSet::new()),
                idle: Notify::new(),
                workers: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                worker_count: config.workers.max(1),
                cancel_wait: config.cancel_wait(),
            }),
        }
    }

    /// Launch the workers. Starting twice is a no-op.
    pub fn start(&self) -> Result<(), PoolError> {
        if self.is_stopped() {
            return Err(PoolError::Stopped);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut workers = self.inner.workers.lock().unwrap_or_else(|e| e.into_inner());
        for index in 0..self.inner.worker_count {
            workers.push(tokio::spawn(worker_loop(Arc::clone(&self.inner), index)));
        }
        info!(workers = self.inner.worker_count, "worker pool started");
        Ok(())
    }

    /// Enqueue a stored job, waiting while the queue is full.
    pub async fn submit(&self, job_id: JobId) -> Result<(), PoolError> {
        if self.is_stopped() {
            return Err(PoolError::Stopped);
        }
        if !self.inner.active().insert(job_id) {
            return Err(PoolError::AlreadyQueued(job_id));
        }
        let shutdown = self.inner.control.shutdown_token();
        let sent = tokio::select! {
            biased;
            _ = shutdown.canceled() => false,
            res = self.inner.tx.send(job_id) => res.is_ok(),
        };
        if !sent {
            self.inner.release(job_id);
            return Err(PoolError::Stopped);
        }
        debug!(job_id, "job queued");
        Ok(())
    }

    /// Store a new job and enqueue it.
    pub async fn enqueue(&self, job: &NewJob) -> Result<JobId, PoolError> {
        if self.is_stopped() {
            return Err(PoolError::Stopped);
        }
        let job_id = self.inner.pipeline.db().create_job(job).await?;
        self.submit(job_id).await?;
        Ok(job_id)
    }

    /// Cancel a queued or running job. Returns false if this pool does not
    /// know the job.
    pub fn cancel(&self, job_id: JobId) -> bool {
        let active = self.inner.active();
        if !active.contains(&job_id) {
            return false;
        }
        self.inner.control.request_cancel(job_id);
        info!(job_id, "cancel requested");
        true
    }

    /// Explicit retry: reset a Failed job to Pending and enqueue it again with
    /// a fresh attempt budget.
    pub async fn retry(&self, job_id: JobId) -> Result<(), PoolError> {
        if self.is_stopped() {
            return Err(PoolError::Stopped);
        }
        if self.inner.active().contains(&job_id) {
            return Err(PoolError::AlreadyQueued(job_id));
        }
        let db = self.inner.pipeline.db();
        if !db.reset_for_retry(job_id).await? {
            return match db.get_job(job_id).await? {
                None => Err(PoolError::NotFound(job_id)),
                Some(_) => Err(PoolError::NotFailed(job_id)),
            };
        }
        self.inner.control.clear(job_id);
        info!(job_id, "job reset for retry");
        self.submit(job_id).await
    }

    /// Jobs submitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.inner.active().len()
    }

    /// Resolves when no job is queued or running, or the pool has stopped.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.in_flight() == 0 || self.is_stopped() {
                return;
            }
            notified.await;
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Signal shutdown, give running jobs `cancel_wait` to observe it, then
    /// abort whatever is left. Safe to call more than once.
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("stopping worker pool");
        self.inner.control.cancel_all();
        self.inner.idle.notify_waiters();

        let handles = std::mem::take(
            &mut *self.inner.workers.lock().unwrap_or_else(|e| e.into_inner()),
        );
        let deadline = tokio::time::Instant::now() + self.inner.cancel_wait;
        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!("worker did not stop within the cancel wait, aborting");
                handle.abort();
                let _ = handle.await;
            }
        }
        info!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Lets workers exit even if stop() was never awaited.
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.control.cancel_all();
    }
}

async fn worker_loop(inner: Arc<Inner>, index: usize) {
    let shutdown = inner.control.shutdown_token();
    debug!(worker = index, "worker started");
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.canceled() => None,
            job = async { inner.rx.lock().await.recv().await } => job,
        };
        let Some(job_id) = next else {
            break;
        };
        run_job(&inner, index, job_id).await;
        inner.release(job_id);
    }
    debug!(worker = index, "worker exiting");
}

async fn run_job(inner: &Arc<Inner>, index: usize, job_id: JobId) {
    let token = inner.control.register(job_id);
    let pipeline = Arc::clone(&inner.pipeline);
    let mut task = AbortOnDrop(tokio::spawn(async move {
        pipeline.run(job_id, &token).await
    }));

    match (&mut task.0).await {
        Ok(outcome) => debug!(worker = index, job_id, ?outcome, "job finished"),
        Err(e) if e.is_panic() => {
            warn!(worker = index, job_id, "job panicked");
            let db = inner.pipeline.db();
            if let Err(e) = db
                .update_status(job_id, JobStatus::Failed, Some("internal error: job panicked"))
                .await
            {
                warn!(job_id, "cannot record panic: {e:#}");
            }
        }
        Err(e) => debug!(worker = index, job_id, "job task ended: {e}"),
    }
}
