//! Blocking libcurl transfers. Run these on the blocking pool.
//!
//! The cancel token is checked in the write callback (before a chunk is
//! accepted) and in the progress callback, which libcurl also invokes while a
//! connection is stalled, so cancellation aborts within a bounded wait.

use std::cell::Cell;
use std::str;
use std::time::Duration;

use curl::easy::Easy;
use tokio::sync::mpsc;

use super::PipelineError;
use crate::config::HttpConfig;
use crate::control::CancelToken;
use crate::staging::StagingFile;

/// Cumulative transfer snapshot sent to the progress worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FetchProgress {
    pub received: u64,
    /// Declared Content-Length of the final response, if any.
    pub total: Option<u64>,
}

fn configure(easy: &mut Easy, url: &str, http: &HttpConfig) -> Result<(), curl::Error> {
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.max_redirections(http.max_redirects)?;
    easy.fail_on_error(true)?;
    easy.buffer_size(http.chunk_size.max(1024))?;
    easy.connect_timeout(Duration::from_secs(http.connect_timeout_secs))?;
    // Abort when fewer than 1 byte/s arrives for the stall timeout.
    easy.low_speed_limit(1)?;
    easy.low_speed_time(Duration::from_secs(http.stall_timeout_secs))?;
    easy.progress(true)?;
    Ok(())
}

/// Parse one header line; a status line resets the length so only the final
/// response after redirects counts.
fn observe_header(line: &[u8], total: &Cell<Option<u64>>) {
    let Ok(line) = str::from_utf8(line) else {
        return;
    };
    if line.starts_with("HTTP/") {
        total.set(None);
        return;
    }
    if let Some((name, value)) = line.split_once(':') {
        if name.trim().eq_ignore_ascii_case("content-length") {
            total.set(value.trim().parse().ok());
        }
    }
}

/// Map a failed `perform()` into a pipeline error.
fn transfer_error(easy: &mut Easy, err: curl::Error, cancel: &CancelToken) -> PipelineError {
    if cancel.is_canceled() {
        return PipelineError::Canceled;
    }
    if err.is_http_returned_error() {
        if let Ok(code) = easy.response_code() {
            return PipelineError::HttpStatus(code);
        }
    }
    PipelineError::Network(err)
}

fn check_status(easy: &mut Easy) -> Result<(), PipelineError> {
    let code = easy.response_code().map_err(PipelineError::Network)?;
    if !(200..300).contains(&code) {
        return Err(PipelineError::HttpStatus(code));
    }
    Ok(())
}

/// Stream `url` into `staging`, reporting cumulative progress on `events`.
/// Returns the number of body bytes received.
pub(crate) fn fetch_to_staging(
    url: &str,
    http: &HttpConfig,
    staging: &mut StagingFile,
    cancel: &CancelToken,
    events: &mpsc::Sender<FetchProgress>,
) -> Result<u64, PipelineError> {
    let mut easy = Easy::new();
    configure(&mut easy, url, http).map_err(PipelineError::Network)?;

    let total = Cell::new(None);
    let received = Cell::new(0u64);
    let mut write_err = None;

    let result = {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|line| {
                observe_header(line, &total);
                true
            })
            .map_err(PipelineError::Network)?;
        transfer
            .write_function(|data| {
                if cancel.is_canceled() {
                    return Ok(0);
                }
                if let Err(e) = staging.write_chunk(data) {
                    write_err = Some(e);
                    return Ok(0);
                }
                received.set(received.get() + data.len() as u64);
                // Lossy: snapshots are cumulative, a dropped one is superseded.
                let _ = events.try_send(FetchProgress {
                    received: received.get(),
                    total: total.get(),
                });
                Ok(data.len())
            })
            .map_err(PipelineError::Network)?;
        transfer
            .progress_function(|_, _, _, _| !cancel.is_canceled())
            .map_err(PipelineError::Network)?;
        transfer.perform()
    };

    if let Err(e) = result {
        if let Some(io) = write_err {
            return Err(PipelineError::StagingWrite(io));
        }
        return Err(transfer_error(&mut easy, e, cancel));
    }
    check_status(&mut easy)?;
    if cancel.is_canceled() {
        return Err(PipelineError::Canceled);
    }
    Ok(received.get())
}

/// Fetch a small text resource (a checksum file), capped at `limit` bytes.
pub(crate) fn fetch_text(
    url: &str,
    http: &HttpConfig,
    cancel: &CancelToken,
    limit: usize,
) -> Result<String, PipelineError> {
    let mut easy = Easy::new();
    configure(&mut easy, url, http).map_err(PipelineError::Network)?;

    let mut body = Vec::new();
    let mut too_large = false;

    let result = {
        let mut transfer = easy.transfer();
        transfer
            .write_function(|data| {
                if cancel.is_canceled() {
                    return Ok(0);
                }
                if body.len() + data.len() > limit {
                    too_large = true;
                    return Ok(0);
                }
                body.extend_from_slice(data);
                Ok(data.len())
            })
            .map_err(PipelineError::Network)?;
        transfer
            .progress_function(|_, _, _, _| !cancel.is_canceled())
            .map_err(PipelineError::Network)?;
        transfer.perform()
    };

    if let Err(e) = result {
        if too_large {
            return Err(PipelineError::ChecksumTooLarge(limit));
        }
        return Err(transfer_error(&mut easy, e, cancel));
    }
    check_status(&mut easy)?;
    Ok(String::from_utf8_lossy(&body).into_owned())
}
