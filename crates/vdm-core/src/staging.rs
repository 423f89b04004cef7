//! Staging area for in-progress downloads.
//!
//! Bytes are written to a `.part` file under a dedicated directory, never next
//! to the destination. The file is deleted when the handle is dropped, so any
//! early return, failure or aborted task cleans up after itself; only
//! [`StagingFile::finalize`] moves it into place.
//!
//! When the staging directory and the destination live on different
//! filesystems the rename fails with EXDEV; the bytes are then copied into a
//! hidden temp file beside the destination and renamed from there, so the
//! destination still only ever appears complete.

use anyhow::{Context, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Suffix of staging files.
pub const STAGING_SUFFIX: &str = ".part";

/// Directory holding staging files.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create a fresh, empty staging file for `job_id`.
    pub fn create(&self, job_id: i64) -> Result<StagingFile> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create staging dir {}", self.dir.display()))?;
        let file = tempfile::Builder::new()
            .prefix(&format!("job-{job_id}-"))
            .suffix(STAGING_SUFFIX)
            .tempfile_in(&self.dir)
            .with_context(|| format!("create staging file in {}", self.dir.display()))?;
        Ok(StagingFile { file, written: 0 })
    }
}

/// Exclusively owned staging file. Deleted on drop unless finalized.
#[derive(Debug)]
pub struct StagingFile {
    file: NamedTempFile,
    written: u64,
}

impl StagingFile {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Flush and sync file contents to disk.
    pub fn sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.as_file().sync_all()
    }

    /// Create the destination's parent directories and atomically move the
    /// staging file to `dest`. On failure the staging file is removed.
    pub fn finalize(mut self, dest: &Path) -> Result<()> {
        self.sync().context("sync staging file")?;
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        match self.file.persist(dest) {
            Ok(_) => Ok(()),
            Err(e) if e.error.kind() == io::ErrorKind::CrossesDevices => {
                debug!(dest = %dest.display(), "staging dir is on another filesystem, copying");
                // `e.file` is dropped after the copy, deleting the staged bytes.
                copy_into_place(e.file.path(), dest)
            }
            Err(e) => Err(e.error)
                .with_context(|| format!("move staging file to {}", dest.display())),
        }
    }
}

/// Copy `src` into a temp file in `dest`'s directory, sync it, then rename it
/// over `dest`. The temp file is removed on any failure.
fn copy_into_place(src: &Path, dest: &Path) -> Result<()> {
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".vdm-")
        .suffix(STAGING_SUFFIX)
        .tempfile_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;
    let mut staged =
        fs::File::open(src).with_context(|| format!("open staging file {}", src.display()))?;
    io::copy(&mut staged, tmp.as_file_mut())
        .with_context(|| format!("copy staging file to {}", dir.display()))?;
    tmp.as_file().sync_all().context("sync copied file")?;
    tmp.persist(dest)
        .map_err(|e| e.error)
        .with_context(|| format!("move copied file to {}", dest.display()))?;
    Ok(())
}
