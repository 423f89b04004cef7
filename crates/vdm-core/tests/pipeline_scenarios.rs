//! End-to-end pipeline and pool behaviour against a local HTTP server.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::http_server::{self, Route};
use common::{dir_entries, retry, Harness};
use vdm_core::checksum::{compute_digest, ChecksumAlgorithm};
use vdm_core::control::CancelToken;
use vdm_core::hub::{Hub, HubMessage};
use vdm_core::progress::{NullSink, RecordingSink};
use vdm_core::{Job, JobStatus, NewJob, RunOutcome};

const HELLO: &[u8] = b"Hello, world!";

/// Poll the store until `done` holds for the job, failing after 10s.
async fn wait_for(h: &Harness, id: i64, done: impl Fn(&Job) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let job = h.db.get_job(id).await.unwrap().unwrap();
        if done(&job) {
            return;
        }
        assert!(Instant::now() < deadline, "timed out waiting on job {id}: {job:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn sha256_of(bytes: &[u8]) -> String {
    let f = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(f.path(), bytes).unwrap();
    compute_digest(f.path(), ChecksumAlgorithm::Sha256).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn completes_small_download_without_checksum() {
    let server = http_server::start(vec![("/file.iso", Route::ok(HELLO))]);
    let h = Harness::new().await;
    let pool = h.pool(Arc::new(NullSink), retry(3, 50), 2, 10);
    pool.start().unwrap();

    let dest = h.download_path("file.iso");
    let id = pool
        .enqueue(&NewJob::new(server.url("/file.iso"), &dest))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(10), pool.wait_idle())
        .await
        .unwrap();

    let job = h.db.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Complete, "error: {:?}", job.error);
    assert_eq!(job.size, Some(13));
    assert_eq!(job.progress, 100);
    assert_eq!(job.attempts, 1);
    assert!(job.completed_at.is_some());
    assert_eq!(std::fs::read(&dest).unwrap(), HELLO);
    assert_eq!(dir_entries(&h.staging_dir()), 0);
    pool.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn checksum_mismatch_fails_without_artifact() {
    let server = http_server::start(vec![
        ("/file.iso", Route::ok(HELLO)),
        ("/SHA256SUMS", Route::ok("deadbeefdeadbeef  file.iso\n")),
    ]);
    let h = Harness::new().await;
    let pipeline = h.pipeline(Arc::new(NullSink), retry(3, 50));

    let dest = h.download_path("file.iso");
    let id = h
        .db
        .create_job(
            &NewJob::new(server.url("/file.iso"), &dest)
                .with_checksum(server.url("/SHA256SUMS"), None),
        )
        .await
        .unwrap();
    let outcome = pipeline.run(id, &CancelToken::new()).await;
    assert!(matches!(outcome, RunOutcome::Failed(_)));

    let job = h.db.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert!(error.contains("checksum mismatch"), "{error}");
    assert!(!dest.exists());
    assert_eq!(dir_entries(&h.staging_dir()), 0);

    let record = job.checksum.unwrap();
    assert_eq!(record.expected, "deadbeefdeadbeef");
    assert_eq!(record.computed, sha256_of(HELLO));
    // Integrity failures are not retried.
    assert_eq!(server.hits("/file.iso"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn checksum_match_completes_and_stores_digest() {
    let digest = sha256_of(HELLO);
    let sums = format!(
        "# release checksums\n0000  other.iso\n{}  *dist/file.iso\n",
        digest.to_uppercase()
    );
    let server = http_server::start(vec![
        ("/dist/file.iso", Route::ok(HELLO)),
        ("/SHA256SUMS", Route::ok(sums)),
    ]);
    let h = Harness::new().await;
    let sink = Arc::new(RecordingSink::new());
    let pipeline = h.pipeline(sink.clone(), retry(3, 50));

    let dest = h.download_path("nested/dir/file.iso");
    let id = h
        .db
        .create_job(
            &NewJob::new(server.url("/dist/file.iso"), &dest)
                .with_checksum(server.url("/SHA256SUMS"), Some("SHA-256")),
        )
        .await
        .unwrap();
    assert_eq!(
        pipeline.run(id, &CancelToken::new()).await,
        RunOutcome::Completed
    );

    let job = h.db.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    let record = job.checksum.unwrap();
    assert_eq!(record.algorithm, "sha256");
    assert_eq!(record.computed, digest);
    assert!(record.expected.eq_ignore_ascii_case(&record.computed));
    assert_eq!(std::fs::read(&dest).unwrap(), HELLO);

    let statuses: Vec<JobStatus> = sink.events_for(id).into_iter().map(|(_, s)| s).collect();
    assert_eq!(statuses.first(), Some(&JobStatus::Downloading));
    assert!(statuses.contains(&JobStatus::Verifying));
    assert_eq!(statuses.last(), Some(&JobStatus::Complete));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_checksum_entry_is_terminal() {
    let server = http_server::start(vec![
        ("/file.iso", Route::ok(HELLO)),
        ("/SHA256SUMS", Route::ok("abcd  something-else.iso\n")),
    ]);
    let h = Harness::new().await;
    let pipeline = h.pipeline(Arc::new(NullSink), retry(3, 50));
    let dest = h.download_path("file.iso");
    let id = h
        .db
        .create_job(
            &NewJob::new(server.url("/file.iso"), &dest)
                .with_checksum(server.url("/SHA256SUMS"), Some("sha512")),
        )
        .await
        .unwrap();
    pipeline.run(id, &CancelToken::new()).await;

    let job = h.db.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("no checksum entry"));
    assert!(!dest.exists());
    assert_eq!(server.hits("/file.iso"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_bounds_concurrency_and_overlaps_jobs() {
    let body = vec![7u8; 4 * 1024];
    let per_job = Duration::from_millis(400);
    let server = http_server::start(vec![(
        "/slow.bin",
        Route::ok(body).slow(4, per_job / 4),
    )]);
    let h = Harness::new().await;
    let pool = h.pool(Arc::new(NullSink), retry(1, 10), 2, 10);
    pool.start().unwrap();

    let started = Instant::now();
    let mut ids = Vec::new();
    for i in 0..5 {
        let dest = h.download_path(&format!("slow-{i}.bin"));
        ids.push(
            pool.enqueue(&NewJob::new(server.url("/slow.bin"), dest))
                .await
                .unwrap(),
        );
    }
    tokio::time::timeout(Duration::from_secs(20), pool.wait_idle())
        .await
        .unwrap();
    let elapsed = started.elapsed();

    for id in ids {
        assert_eq!(h.status(id).await, JobStatus::Complete);
    }
    // ceil(5/2) rounds of ~400ms, well short of 5 sequential downloads.
    assert!(elapsed >= per_job * 3, "finished too fast: {elapsed:?}");
    assert!(elapsed < per_job * 5, "jobs did not overlap: {elapsed:?}");
    assert!(server.peak_concurrency() <= 2);
    assert_eq!(server.peak_concurrency(), 2);
    pool.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_cancels_running_download_promptly() {
    let server = http_server::start(vec![(
        "/big.iso",
        Route::ok(vec![1u8; 64 * 1024]).slow(20, Duration::from_millis(250)),
    )]);
    let h = Harness::new().await;
    let pool = h.pool(Arc::new(NullSink), retry(3, 50), 1, 10);
    pool.start().unwrap();

    let dest = h.download_path("big.iso");
    let id = pool
        .enqueue(&NewJob::new(server.url("/big.iso"), &dest))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stopping = Instant::now();
    pool.stop().await;
    pool.stop().await;
    // Cancel wait is 2s in the harness.
    assert!(stopping.elapsed() < Duration::from_millis(2500));

    let job = h.db.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("canceled"));
    assert_eq!(job.attempts, 0);
    assert!(!dest.exists());
    assert_eq!(dir_entries(&h.staging_dir()), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn submit_blocks_when_queue_full_until_started() {
    let server = http_server::start(vec![("/tiny", Route::ok(HELLO))]);
    let h = Harness::new().await;
    let pool = Arc::new(h.pool(Arc::new(NullSink), retry(1, 10), 4, 100));

    let mut ids = Vec::new();
    for i in 0..110 {
        let dest = h.download_path(&format!("tiny-{i}"));
        ids.push(
            h.db.create_job(&NewJob::new(server.url("/tiny"), dest))
                .await
                .unwrap(),
        );
    }

    for &id in &ids[..100] {
        tokio::time::timeout(Duration::from_millis(100), pool.submit(id))
            .await
            .expect("submit within capacity returns immediately")
            .unwrap();
    }

    let p = Arc::clone(&pool);
    let next = ids[100];
    let blocked = tokio::spawn(async move { p.submit(next).await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!blocked.is_finished(), "101st submit should block");

    pool.start().unwrap();
    tokio::time::timeout(Duration::from_secs(5), blocked)
        .await
        .expect("unblocked once workers drain")
        .unwrap()
        .unwrap();
    for &id in &ids[101..] {
        pool.submit(id).await.unwrap();
    }

    tokio::time::timeout(Duration::from_secs(30), pool.wait_idle())
        .await
        .unwrap();
    for id in ids {
        assert_eq!(h.status(id).await, JobStatus::Complete);
    }
    pool.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn transient_failures_are_retried_then_succeed() {
    let server = http_server::start(vec![("/flaky", Route::ok(HELLO).failing_first(2))]);
    let h = Harness::new().await;
    let sink = Arc::new(RecordingSink::new());
    let pipeline = h.pipeline(sink.clone(), retry(3, 50));
    let id = h
        .db
        .create_job(&NewJob::new(server.url("/flaky"), h.download_path("flaky")))
        .await
        .unwrap();

    assert_eq!(
        pipeline.run(id, &CancelToken::new()).await,
        RunOutcome::Completed
    );
    let job = h.db.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.attempts, 3);
    assert_eq!(job.error, None);
    assert_eq!(server.hits("/flaky"), 3);

    // Automatic retries stay inside Downloading: no terminal status is ever
    // observed before the job completes.
    let events = sink.events_for(id);
    assert!(
        events
            .iter()
            .all(|(_, s)| matches!(s, JobStatus::Downloading | JobStatus::Complete)),
        "{events:?}"
    );
    assert_eq!(events.first(), Some(&(0, JobStatus::Downloading)));
    assert_eq!(events.last(), Some(&(100, JobStatus::Complete)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn retry_budget_exhausted_fails_with_last_cause() {
    let server = http_server::start(vec![("/down", Route::status(503))]);
    let h = Harness::new().await;
    let pipeline = h.pipeline(Arc::new(NullSink), retry(2, 20));
    let id = h
        .db
        .create_job(&NewJob::new(server.url("/down"), h.download_path("down")))
        .await
        .unwrap();

    let outcome = pipeline.run(id, &CancelToken::new()).await;
    assert_eq!(
        outcome,
        RunOutcome::Failed("HTTP 503 (after 2 attempts)".to_string())
    );
    let job = h.db.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.error.as_deref(), Some("HTTP 503 (after 2 attempts)"));
    assert_eq!(job.attempts, 2);
    assert_eq!(server.hits("/down"), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_during_retry_delay() {
    let server = http_server::start(vec![("/down", Route::status(500))]);
    let h = Harness::new().await;
    let sink = Arc::new(RecordingSink::new());
    let pipeline = Arc::new(h.pipeline(sink.clone(), retry(5, 10_000)));
    let id = h
        .db
        .create_job(&NewJob::new(server.url("/down"), h.download_path("down")))
        .await
        .unwrap();

    let cancel = CancelToken::new();
    let token = cancel.clone();
    let p = Arc::clone(&pipeline);
    let started = Instant::now();
    let run = tokio::spawn(async move { p.run(id, &token).await });

    // While waiting out the delay the job is still active, with a note.
    wait_for(&h, id, |job| job.error.is_some()).await;
    let job = h.db.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Downloading);
    let note = job.error.unwrap();
    assert!(note.starts_with("attempt 1/5 failed: HTTP 500"), "{note}");
    assert!(note.ends_with("; retrying"), "{note}");

    cancel.cancel();
    let outcome = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, RunOutcome::Canceled);
    assert!(started.elapsed() < Duration::from_secs(5));

    let job = h.db.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("canceled"));
    assert_eq!(server.hits("/down"), 1);
    assert_eq!(
        sink.events_for(id),
        vec![(0, JobStatus::Downloading), (0, JobStatus::Failed)]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_while_verifying() {
    let body = vec![5u8; 8 * 1024 * 1024];
    let digest = sha256_of(&body);
    let server = http_server::start(vec![
        ("/big.iso", Route::ok(body)),
        (
            "/SHA256SUMS",
            Route::ok(format!("{digest}  big.iso\n")).slow(10, Duration::from_millis(500)),
        ),
    ]);
    let h = Harness::new().await;
    let pipeline = Arc::new(h.pipeline(Arc::new(NullSink), retry(3, 50)));
    let dest = h.download_path("big.iso");
    let id = h
        .db
        .create_job(
            &NewJob::new(server.url("/big.iso"), &dest)
                .with_checksum(server.url("/SHA256SUMS"), None),
        )
        .await
        .unwrap();

    let cancel = CancelToken::new();
    let token = cancel.clone();
    let p = Arc::clone(&pipeline);
    let run = tokio::spawn(async move { p.run(id, &token).await });

    wait_for(&h, id, |job| job.status == JobStatus::Verifying).await;
    let canceled_at = Instant::now();
    cancel.cancel();
    let outcome = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, RunOutcome::Canceled);
    assert!(canceled_at.elapsed() < Duration::from_millis(2500));

    let job = h.db.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("canceled"));
    assert!(job.checksum.is_none());
    assert!(!dest.exists());
    assert_eq!(dir_entries(&h.staging_dir()), 0);
    assert_eq!(server.hits("/big.iso"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn percent_encoded_source_name_matches_checksum_entry() {
    let digest = sha256_of(HELLO);
    let server = http_server::start(vec![
        ("/pub/my%20file.iso", Route::ok(HELLO)),
        ("/SHA256SUMS", Route::ok(format!("{digest}  my file.iso\n"))),
    ]);
    let h = Harness::new().await;
    let pipeline = h.pipeline(Arc::new(NullSink), retry(1, 10));
    let dest = h.download_path("my file.iso");
    let id = h
        .db
        .create_job(
            &NewJob::new(server.url("/pub/my%20file.iso"), &dest)
                .with_checksum(server.url("/SHA256SUMS"), None),
        )
        .await
        .unwrap();

    assert_eq!(
        pipeline.run(id, &CancelToken::new()).await,
        RunOutcome::Completed
    );
    let job = h.db.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.checksum.unwrap().computed, digest);
    assert_eq!(std::fs::read(&dest).unwrap(), HELLO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn user_cancel_of_queued_job_never_fetches() {
    let server = http_server::start(vec![("/file", Route::ok(HELLO))]);
    let h = Harness::new().await;
    let pool = h.pool(Arc::new(NullSink), retry(3, 50), 1, 10);
    let id = pool
        .enqueue(&NewJob::new(server.url("/file"), h.download_path("file")))
        .await
        .unwrap();
    assert!(pool.cancel(id));
    pool.start().unwrap();
    tokio::time::timeout(Duration::from_secs(5), pool.wait_idle())
        .await
        .unwrap();

    let job = h.db.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("canceled"));
    assert_eq!(server.hits("/file"), 0);
    pool.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn explicit_retry_reruns_failed_job() {
    let server = http_server::start(vec![("/once", Route::ok(HELLO).failing_first(1))]);
    let h = Harness::new().await;
    let pool = h.pool(Arc::new(NullSink), retry(1, 10), 1, 10);
    pool.start().unwrap();
    let dest = h.download_path("once");
    let id = pool
        .enqueue(&NewJob::new(server.url("/once"), &dest))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), pool.wait_idle())
        .await
        .unwrap();
    let job = h.db.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("HTTP 500 (after 1 attempts)"));

    pool.retry(id).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), pool.wait_idle())
        .await
        .unwrap();
    let job = h.db.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.attempts, 1);
    assert_eq!(std::fs::read(&dest).unwrap(), HELLO);
    pool.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn progress_is_monotonic_and_ends_at_100() {
    let server = http_server::start(vec![(
        "/chunked.bin",
        Route::ok(vec![3u8; 100 * 1024]).slow(10, Duration::from_millis(60)),
    )]);
    let h = Harness::new().await;
    let sink = Arc::new(RecordingSink::new());
    let pipeline = h.pipeline(sink.clone(), retry(1, 10));
    let id = h
        .db
        .create_job(&NewJob::new(server.url("/chunked.bin"), h.download_path("c.bin")))
        .await
        .unwrap();
    assert_eq!(
        pipeline.run(id, &CancelToken::new()).await,
        RunOutcome::Completed
    );

    let events = sink.events_for(id);
    assert_eq!(events.first(), Some(&(0, JobStatus::Downloading)));
    assert_eq!(events.last(), Some(&(100, JobStatus::Complete)));
    let downloading: Vec<u8> = events
        .iter()
        .filter(|(_, s)| *s == JobStatus::Downloading)
        .map(|(p, _)| *p)
        .collect();
    assert!(downloading.len() > 2, "expected intermediate progress: {events:?}");
    assert!(downloading.windows(2).all(|w| w[0] <= w[1]), "{downloading:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn body_without_length_records_received_size() {
    let server = http_server::start(vec![("/stream", Route::ok(HELLO).without_length())]);
    let h = Harness::new().await;
    let pipeline = h.pipeline(Arc::new(NullSink), retry(1, 10));
    let id = h
        .db
        .create_job(&NewJob::new(server.url("/stream"), h.download_path("stream")))
        .await
        .unwrap();
    assert_eq!(
        pipeline.run(id, &CancelToken::new()).await,
        RunOutcome::Completed
    );
    let job = h.db.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.size, Some(13));
    assert_eq!(job.progress, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn non_pending_job_is_skipped() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(Arc::new(NullSink), retry(1, 10));
    let id = h
        .db
        .create_job(&NewJob::new("http://127.0.0.1:9/x", h.download_path("x")))
        .await
        .unwrap();
    h.db.update_status(id, JobStatus::Downloading, None)
        .await
        .unwrap();
    h.db.update_status(id, JobStatus::Complete, None).await.unwrap();
    assert_eq!(
        pipeline.run(id, &CancelToken::new()).await,
        RunOutcome::Skipped
    );
    assert_eq!(
        pipeline.run(id + 1, &CancelToken::new()).await,
        RunOutcome::Skipped
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hub_observers_receive_json_progress() {
    let server = http_server::start(vec![("/file.iso", Route::ok(HELLO))]);
    let h = Harness::new().await;
    let hub = Hub::spawn(64, 64);
    let mut observer = hub.register().await.unwrap();
    let pool = h.pool(Arc::new(hub.clone()), retry(1, 10), 1, 10);
    pool.start().unwrap();
    let id = pool
        .enqueue(&NewJob::new(server.url("/file.iso"), h.download_path("file.iso")))
        .await
        .unwrap();

    let mut last = None;
    while let Ok(Some(msg)) = tokio::time::timeout(Duration::from_secs(5), observer.recv()).await {
        let HubMessage::Progress(ref payload) = msg;
        assert_eq!(payload.id, id.to_string());
        let done = payload.status == JobStatus::Complete;
        last = Some(msg);
        if done {
            break;
        }
    }
    let last = last.expect("received progress");
    assert_eq!(
        last.to_json().unwrap(),
        format!(r#"{{"type":"progress","payload":{{"id":"{id}","progress":100,"status":"complete"}}}}"#)
    );
    pool.stop().await;
}
