//! Control socket: server (during `vdm run`) and client (for `vdm cancel`).
//! Protocol: one line per command, "cancel <id>"; the server answers each
//! line with "ok" or "unknown".

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use vdm_core::WorkerPool;

/// Parses "cancel <id>". Anything else is ignored.
pub(crate) fn parse_command(line: &str) -> Option<i64> {
    let id = line.trim().strip_prefix("cancel ")?;
    id.trim().parse::<i64>().ok()
}

/// Binds `path` and spawns a task that calls `pool.cancel(id)` for each
/// "cancel <id>" line.
pub fn spawn_control_listener(
    pool: Arc<WorkerPool>,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)?;
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let pool = Arc::clone(&pool);
                    tokio::spawn(serve_connection(stream, pool));
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

async fn serve_connection(stream: UnixStream, pool: Arc<WorkerPool>) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Some(id) = parse_command(&line) else {
            tracing::debug!(line = %line, "ignoring control command");
            continue;
        };
        let reply = if pool.cancel(id) { "ok\n" } else { "unknown\n" };
        if write.write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
}

/// Removes the socket file when `vdm run` exits.
pub struct SocketGuard(pub PathBuf);

impl Drop for SocketGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Sends "cancel <job_id>" and returns whether the runner knew the job.
/// `None` when no runner is listening.
pub async fn send_cancel(socket_path: &Path, job_id: i64) -> Result<Option<bool>> {
    if !socket_path.exists() {
        return Ok(None);
    }
    let mut stream = match UnixStream::connect(socket_path).await {
        Ok(s) => s,
        // Stale socket left by a crashed runner.
        Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    stream
        .write_all(format!("cancel {}\n", job_id).as_bytes())
        .await?;
    let mut reply = String::new();
    BufReader::new(stream).read_line(&mut reply).await?;
    Ok(Some(reply.trim() == "ok"))
}
