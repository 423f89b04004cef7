//! Source URL handling: validation, source filename, default destination.

mod sanitize;

pub use sanitize::sanitize_filename;

use anyhow::{bail, Context, Result};
use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};
use url::Url;

/// Fallback when the URL path yields no usable filename.
pub const DEFAULT_FILENAME: &str = "download.bin";

/// Parse a source URL and require an http(s) scheme.
pub fn parse_source_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("invalid URL '{raw}'"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => bail!("unsupported URL scheme '{other}' (expected http or https)"),
    }
}

/// Last non-empty path segment of `url`, ignoring query and fragment.
///
/// This is the name looked up in checksum files, so it is percent-decoded
/// (checksum files list `my file.iso`, not `my%20file.iso`) but not sanitized.
pub fn source_filename(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let name = percent_decode_str(segment).decode_utf8_lossy();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.into_owned())
}

/// `<download_dir>/<sanitized source filename>`, falling back to [`DEFAULT_FILENAME`].
pub fn default_destination(download_dir: &Path, url: &str) -> PathBuf {
    let name = source_filename(url)
        .map(|s| sanitize_filename(&s))
        .filter(|s| !s.is_empty() && s != "." && s != "..")
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string());
    download_dir.join(name)
}
