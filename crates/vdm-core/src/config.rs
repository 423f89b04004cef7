use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Worker pool sizing and shutdown behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of long-lived workers.
    pub workers: usize,
    /// Bounded queue capacity; `submit` blocks once this many jobs wait.
    pub queue_capacity: usize,
    /// How long `stop()` waits for running jobs to observe cancellation.
    pub cancel_wait_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 100,
            cancel_wait_ms: 5000,
        }
    }
}

impl PoolConfig {
    pub fn cancel_wait(&self) -> Duration {
        Duration::from_millis(self.cancel_wait_ms)
    }
}

/// Fixed-delay retry parameters for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of fetch attempts (including the first).
    pub max_attempts: u32,
    /// Delay between attempts in milliseconds.
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 2000,
        }
    }
}

/// Progress throttling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProgressConfig {
    pub interval_ms: u64,
    pub threshold_percent: u8,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            threshold_percent: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HubConfig {
    /// Broadcast inbox between producers and the hub actor.
    pub inbox_capacity: usize,
    /// Per-observer outbound buffer; a full buffer drops the observer.
    pub observer_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: 256,
            observer_buffer: 64,
        }
    }
}

/// Transfer settings passed to libcurl.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpConfig {
    pub chunk_size: usize,
    pub connect_timeout_secs: u64,
    /// Abort when the transfer makes no progress for this long.
    pub stall_timeout_secs: u64,
    pub max_redirects: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            connect_timeout_secs: 30,
            stall_timeout_secs: 60,
            max_redirects: 10,
        }
    }
}

/// Global configuration loaded from `~/.config/vdm/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VdmConfig {
    /// Where `vdm add` places finished files when no output path is given.
    pub download_dir: Option<PathBuf>,
    /// Staging area for in-progress downloads. Defaults to the XDG state dir.
    pub temp_dir: Option<PathBuf>,
    pub pool: PoolConfig,
    pub retry: RetryConfig,
    pub progress: ProgressConfig,
    pub hub: HubConfig,
    pub http: HttpConfig,
}

impl VdmConfig {
    /// Staging directory: configured `temp_dir` or `$XDG_STATE_HOME/vdm/staging`.
    pub fn staging_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.temp_dir {
            return Ok(dir.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("vdm")?;
        Ok(xdg_dirs.get_state_home().join("staging"))
    }

    /// Download directory: configured `download_dir` or the current directory.
    pub fn download_dir(&self) -> Result<PathBuf> {
        match &self.download_dir {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir().context("current directory"),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("vdm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<VdmConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = VdmConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: VdmConfig =
        toml::from_str(&data).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}
