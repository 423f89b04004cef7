//! Verify step: fetch the checksum resource, find the entry for the source
//! filename and compare it against the staged bytes.

use tracing::debug;

use super::execution::Execution;
use super::fetch::fetch_text;
use super::{PipelineError, CHECKSUM_TEXT_LIMIT};
use crate::checksum::{compute_digest, digests_match, parse_checksum_text, ChecksumAlgorithm};
use crate::job::ChecksumRecord;
use crate::staging::StagingFile;
use crate::url_model;

impl Execution<'_> {
    /// Stores the checksum record whether or not the digests match.
    pub(super) async fn verify(
        &self,
        staging: &StagingFile,
        checksum_url: &str,
    ) -> Result<(), PipelineError> {
        let job_id = self.job.id;
        let algorithm = ChecksumAlgorithm::from_tag(self.job.checksum_algorithm.as_deref())?;
        let filename = url_model::source_filename(&self.job.url)
            .ok_or_else(|| PipelineError::NoSourceFilename(self.job.url.clone()))?;

        let text = {
            let url = checksum_url.to_string();
            let http = self.pipeline.http.clone();
            let cancel = self.cancel.clone();
            tokio::task::spawn_blocking(move || {
                fetch_text(&url, &http, &cancel, CHECKSUM_TEXT_LIMIT)
            })
            .await??
        };
        let expected = parse_checksum_text(&text, &filename)?;

        let path = staging.path().to_path_buf();
        let hashing = tokio::task::spawn_blocking(move || compute_digest(&path, algorithm));
        let cancel = self.cancel.clone();
        let computed = tokio::select! {
            digest = hashing => digest??,
            _ = cancel.canceled() => return Err(PipelineError::Canceled),
        };
        debug!(job_id, %algorithm, %expected, %computed, "digest computed");

        let record = ChecksumRecord {
            algorithm: algorithm.as_str().to_string(),
            expected: expected.clone(),
            computed: computed.clone(),
        };
        self.pipeline
            .db
            .update_checksum(job_id, &record)
            .await
            .map_err(PipelineError::Store)?;

        if !digests_match(&expected, &computed) {
            return Err(PipelineError::Mismatch {
                expected,
                actual: computed,
            });
        }
        Ok(())
    }
}
