//! Checksum engine: streaming file digests and checksum-file parsing.
//!
//! Digests are computed by reading the file in chunks so memory use stays
//! bounded regardless of file size.

use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

const BUF_SIZE: usize = 64 * 1024;

/// Errors from the checksum engine. All of them are integrity failures.
#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    #[error("unsupported checksum algorithm '{0}'")]
    UnsupportedAlgorithm(String),
    #[error("no checksum entry for '{0}'")]
    NotFound(String),
    #[error("read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Supported hash functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumAlgorithm {
    Sha224,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha224 => "sha224",
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha384 => "sha384",
            ChecksumAlgorithm::Sha512 => "sha512",
        }
    }

    /// Parses an optional tag; `None` selects the default (SHA-256).
    pub fn from_tag(tag: Option<&str>) -> Result<Self, ChecksumError> {
        match tag {
            None => Ok(Self::default()),
            Some(t) => t.parse(),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = ChecksumError;

    /// Accepts "sha256", "SHA-256", "sha_256" and the like.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match norm.as_str() {
            "sha224" => Ok(ChecksumAlgorithm::Sha224),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "sha384" => Ok(ChecksumAlgorithm::Sha384),
            "sha512" => Ok(ChecksumAlgorithm::Sha512),
            _ => Err(ChecksumError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// Compute the digest of a file and return it as lowercase hex.
pub fn compute_digest(path: &Path, algorithm: ChecksumAlgorithm) -> Result<String, ChecksumError> {
    match algorithm {
        ChecksumAlgorithm::Sha224 => stream_digest::<Sha224>(path),
        ChecksumAlgorithm::Sha256 => stream_digest::<Sha256>(path),
        ChecksumAlgorithm::Sha384 => stream_digest::<Sha384>(path),
        ChecksumAlgorithm::Sha512 => stream_digest::<Sha512>(path),
    }
}

fn stream_digest<D: Digest>(path: &Path) -> Result<String, ChecksumError> {
    let io_err = |source| ChecksumError::Io {
        path: path.display().to_string(),
        source,
    };
    let mut f = File::open(path).map_err(io_err)?;
    let mut hasher = D::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = f.read(&mut buf).map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Find the digest for `target` in checksum-file text (`sha256sum` style).
///
/// Accepts `<hex>  <name>` and `<hex> *<name>`; the name may carry a directory
/// prefix. Blank lines and `#` comments are skipped. Lines whose digest is not
/// hex are ignored.
pub fn parse_checksum_text(text: &str, target: &str) -> Result<String, ChecksumError> {
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((digest, rest)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        let name = rest.trim_start();
        let name = name.strip_prefix('*').unwrap_or(name);
        let base = name.rsplit('/').next().unwrap_or(name);
        if base != target {
            continue;
        }
        if digest.is_empty() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            continue;
        }
        return Ok(digest.to_ascii_lowercase());
    }
    Err(ChecksumError::NotFound(target.to_string()))
}

/// Case-insensitive digest comparison.
pub fn digests_match(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}
