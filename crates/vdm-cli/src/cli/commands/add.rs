//! `vdm add <url>` – add a new download job.

use anyhow::{Context, Result};
use std::path::PathBuf;
use vdm_core::checksum::ChecksumAlgorithm;
use vdm_core::config::VdmConfig;
use vdm_core::store::JobDb;
use vdm_core::url_model::{default_destination, parse_source_url};
use vdm_core::NewJob;

#[derive(Debug)]
pub struct AddArgs {
    pub url: String,
    pub checksum_url: Option<String>,
    pub algorithm: Option<String>,
    pub output: Option<PathBuf>,
}

/// Validate the inputs, resolve the destination and store a Pending job.
pub async fn run_add(db: &JobDb, cfg: &VdmConfig, args: AddArgs) -> Result<()> {
    parse_source_url(&args.url)?;
    if let Some(ref checksum_url) = args.checksum_url {
        parse_source_url(checksum_url).context("checksum URL")?;
    }
    let algorithm = ChecksumAlgorithm::from_tag(args.algorithm.as_deref())?;

    let destination = match args.output {
        Some(path) => path,
        None => default_destination(&cfg.download_dir()?, &args.url),
    };

    let mut job = NewJob::new(args.url.as_str(), destination);
    if let Some(checksum_url) = args.checksum_url {
        job = job.with_checksum(checksum_url, Some(algorithm.as_str()));
    }
    let id = db.create_job(&job).await?;
    println!("Added job {id} for URL: {}", args.url);
    println!("  -> {}", job.destination.display());
    Ok(())
}
