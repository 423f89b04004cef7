//! `vdm run` – run the worker pool over every pending job.

use anyhow::Result;
use std::sync::Arc;
use vdm_core::config::VdmConfig;
use vdm_core::control::default_control_socket_path;
use vdm_core::hub::{Hub, HubHandle, Observer};
use vdm_core::store::JobDb;
use vdm_core::{JobStatus, Pipeline, WorkerPool};

use crate::cli::control_socket::{self, SocketGuard};

/// Prints every hub message as one JSON line until the observer is closed.
fn spawn_printer(mut observer: Observer) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = observer.recv().await {
            match msg.to_json() {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!("cannot encode progress message: {}", e),
            }
        }
    })
}

pub async fn run_pool(db: JobDb, cfg: &VdmConfig, workers: Option<usize>) -> Result<()> {
    let recovered = db.recover_interrupted_jobs().await?;
    if recovered > 0 {
        tracing::info!("recovered {} interrupted job(s) from previous run", recovered);
    }
    let pending = db.pending_jobs().await?;
    if pending.is_empty() {
        println!("No pending jobs.");
        return Ok(());
    }

    let hub: HubHandle = Hub::spawn(cfg.hub.inbox_capacity, cfg.hub.observer_buffer);
    let observer = hub.register().await?;
    let observer_id = observer.id;
    let printer = spawn_printer(observer);

    let pipeline = Pipeline::from_config(db.clone(), Arc::new(hub.clone()), cfg)?;
    let mut pool_cfg = cfg.pool.clone();
    if let Some(n) = workers {
        pool_cfg.workers = n;
    }
    let pool = Arc::new(WorkerPool::new(&pool_cfg, Arc::new(pipeline)));
    pool.start()?;

    let mut listener = None;
    let mut _socket_guard = None;
    if let Ok(socket_path) = default_control_socket_path() {
        match control_socket::spawn_control_listener(Arc::clone(&pool), &socket_path) {
            Ok(handle) => {
                tracing::debug!(path = %socket_path.display(), "control socket listening");
                listener = Some(handle);
                _socket_guard = Some(SocketGuard(socket_path));
            }
            Err(e) => tracing::warn!("control socket unavailable: {:#}", e),
        }
    }

    let ids: Vec<i64> = pending.iter().map(|j| j.id).collect();
    let drive = async {
        for &id in &ids {
            pool.submit(id).await?;
        }
        pool.wait_idle().await;
        Ok::<_, anyhow::Error>(())
    };
    let result = tokio::select! {
        res = drive => res,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, stopping");
            Ok(())
        }
    };
    pool.stop().await;
    if let Some(handle) = listener {
        handle.abort();
    }

    // Unregistering closes the observer once its buffered messages are printed.
    let _ = hub.unregister(observer_id).await;
    let _ = printer.await;
    result?;

    let (mut complete, mut failed, mut other) = (0u32, 0u32, 0u32);
    for id in ids {
        match db.get_job(id).await?.map(|j| j.status) {
            Some(JobStatus::Complete) => complete += 1,
            Some(JobStatus::Failed) => failed += 1,
            _ => other += 1,
        }
    }
    println!("{complete} complete, {failed} failed, {other} unfinished");
    tracing::info!(complete, failed, other, "run finished");
    Ok(())
}
