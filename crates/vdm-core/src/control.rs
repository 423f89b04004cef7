//! Job control: cooperative cancellation tokens and the per-job registry.
//!
//! Every running job gets a [`CancelToken`] from [`JobControl`]. A user cancel
//! (`vdm cancel 3` via the control socket) or a pool shutdown sets the token;
//! the pipeline checks it between chunks and awaits it at suspension points.

use crate::job::JobId;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct TokenState {
    canceled: AtomicBool,
    notify: Notify,
}

/// Cloneable cancellation flag with an async wait.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake every waiter. Idempotent.
    pub fn cancel(&self) {
        if !self.inner.canceled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called (immediately if it already was).
    pub async fn canceled(&self) {
        loop {
            // Register interest before checking the flag so a concurrent
            // cancel between the check and the await is not lost.
            let notified = self.inner.notify.notified();
            if self.is_canceled() {
                return;
            }
            notified.await;
        }
    }
}

/// Shared registry of job id -> cancel token.
#[derive(Debug, Default)]
pub struct JobControl {
    jobs: RwLock<HashMap<JobId, CancelToken>>,
    shutdown: CancelToken,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for a job about to run. A job canceled while still queued keeps its
    /// canceled token; after shutdown every new token starts canceled.
    pub fn register(&self, job_id: JobId) -> CancelToken {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let token = jobs.entry(job_id).or_default().clone();
        if self.shutdown.is_canceled() {
            token.cancel();
        }
        token
    }

    /// Unregister a job (call when the job finishes, success or failure).
    pub fn unregister(&self, job_id: JobId) {
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&job_id);
    }

    /// User cancel. If the job is not running yet, a pre-canceled token is
    /// parked so the job fails with "canceled" as soon as a worker picks it up.
    pub fn request_cancel(&self, job_id: JobId) {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        jobs.entry(job_id).or_default().cancel();
    }

    /// Drop a parked cancel request (used when a job is explicitly retried).
    pub fn clear(&self, job_id: JobId) {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        if jobs.get(&job_id).is_some_and(CancelToken::is_canceled) {
            jobs.remove(&job_id);
        }
    }

    /// Cancel every registered job and all jobs registered afterwards.
    pub fn cancel_all(&self) {
        self.shutdown.cancel();
        for token in self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
        {
            token.cancel();
        }
    }

    /// Token that fires on `cancel_all`.
    pub fn shutdown_token(&self) -> CancelToken {
        self.shutdown.clone()
    }

    pub fn is_registered(&self, job_id: JobId) -> bool {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&job_id)
    }
}

/// Default path for the control socket (same XDG state dir as the DB).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("vdm")?.get_state_home();
    Ok(dir.join("control.sock"))
}
