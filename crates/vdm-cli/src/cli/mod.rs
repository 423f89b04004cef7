//! CLI for the VDM download manager.

mod commands;
mod control_socket;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vdm_core::config;
use vdm_core::store::JobDb;

use commands::{
    run_add, run_cancel, run_checksum, run_pool, run_remove, run_retry, run_status, AddArgs,
};

/// Top-level CLI for the VDM download manager.
#[derive(Debug, Parser)]
#[command(name = "vdm")]
#[command(about = "VDM: concurrent download-and-verify manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Add a new download job.
    Add {
        /// Direct HTTP/HTTPS URL to download.
        url: String,

        /// URL of a checksum file (e.g. SHA256SUMS) to verify against.
        #[arg(long, value_name = "URL")]
        checksum_url: Option<String>,

        /// Checksum algorithm tag (sha224, sha256, sha384, sha512).
        #[arg(long, value_name = "ALGO", requires = "checksum_url")]
        algorithm: Option<String>,

        /// Destination path (default: <download_dir>/<file name from URL>).
        #[arg(long, short, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Run the worker pool until every pending job has finished.
    Run {
        /// Number of concurrent workers (default from config).
        #[arg(long, value_name = "N")]
        workers: Option<usize>,
    },

    /// Show status of all jobs.
    Status,

    /// Reset a failed job so the next run picks it up again.
    Retry {
        /// Job identifier.
        id: i64,
    },

    /// Cancel a queued or running job.
    Cancel {
        /// Job identifier.
        id: i64,
    },

    /// Remove a job by ID.
    Remove {
        /// Job identifier.
        id: i64,

        /// Also delete the downloaded file.
        #[arg(long)]
        delete_file: bool,
    },

    /// Compute the digest of a local file.
    Checksum {
        /// Path to the file.
        path: PathBuf,

        /// Algorithm tag (default sha256).
        #[arg(long, value_name = "ALGO")]
        algorithm: Option<String>,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let db = JobDb::open_default().await?;

        match cli.command {
            CliCommand::Add {
                url,
                checksum_url,
                algorithm,
                output,
            } => {
                let args = AddArgs {
                    url,
                    checksum_url,
                    algorithm,
                    output,
                };
                run_add(&db, &cfg, args).await?;
            }
            CliCommand::Run { workers } => run_pool(db, &cfg, workers).await?,
            CliCommand::Status => run_status(&db).await?,
            CliCommand::Retry { id } => run_retry(&db, id).await?,
            CliCommand::Cancel { id } => run_cancel(&db, id).await?,
            CliCommand::Remove { id, delete_file } => run_remove(&db, id, delete_file).await?,
            CliCommand::Checksum { path, algorithm } => {
                run_checksum(&path, algorithm.as_deref()).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
