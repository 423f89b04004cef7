//! `vdm checksum <path>` – compute the digest of a local file.

use anyhow::{Context, Result};
use std::path::Path;
use vdm_core::checksum::{compute_digest, ChecksumAlgorithm};

/// Print `<digest>  <path>` in the same layout as `sha256sum`.
pub async fn run_checksum(path: &Path, algorithm: Option<&str>) -> Result<()> {
    let algorithm = ChecksumAlgorithm::from_tag(algorithm)?;
    let owned = path.to_path_buf();
    let digest = tokio::task::spawn_blocking(move || compute_digest(&owned, algorithm))
        .await
        .context("checksum task join")??;
    println!("{}  {}", digest, path.display());
    Ok(())
}
