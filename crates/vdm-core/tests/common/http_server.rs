//! Minimal threaded HTTP/1.1 server for integration tests.
//!
//! Serves a fixed set of routes (path -> response). Bodies can be streamed in
//! chunks with a delay between them, a route can fail its first N requests,
//! and the server records per-path hit counts and the peak number of
//! connections handled at once.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Route {
    pub status: u16,
    pub body: Vec<u8>,
    /// Number of pieces the body is written in.
    pub chunks: usize,
    /// Pause before each piece.
    pub chunk_delay: Duration,
    pub send_length: bool,
    /// The first `fail_first` requests get a 500.
    pub fail_first: usize,
}

impl Route {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            chunks: 1,
            chunk_delay: Duration::ZERO,
            send_length: true,
            fail_first: 0,
        }
    }

    pub fn status(code: u16) -> Self {
        Self {
            status: code,
            ..Self::ok(format!("status {code}"))
        }
    }

    pub fn slow(mut self, chunks: usize, chunk_delay: Duration) -> Self {
        self.chunks = chunks.max(1);
        self.chunk_delay = chunk_delay;
        self
    }

    pub fn without_length(mut self) -> Self {
        self.send_length = false;
        self
    }

    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }
}

#[derive(Default)]
struct Stats {
    active: AtomicUsize,
    peak: AtomicUsize,
    hits: Mutex<HashMap<String, usize>>,
}

pub struct TestServer {
    base: String,
    stats: Arc<Stats>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Most connections that were being served at the same instant.
    pub fn peak_concurrency(&self) -> usize {
        self.stats.peak.load(Ordering::SeqCst)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.stats
            .hits
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(0)
    }
}

/// Starts the server on a background thread. It runs until the process exits.
pub fn start(routes: Vec<(&str, Route)>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let routes: Arc<HashMap<String, Route>> = Arc::new(
        routes
            .into_iter()
            .map(|(p, r)| (p.to_string(), r))
            .collect(),
    );
    let stats = Arc::new(Stats::default());
    let server_stats = Arc::clone(&stats);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let routes = Arc::clone(&routes);
            let stats = Arc::clone(&server_stats);
            thread::spawn(move || handle(stream, &routes, &stats));
        }
    });
    TestServer {
        base: format!("http://127.0.0.1:{port}"),
        stats,
    }
}

/// Counts a connection as active until released or dropped.
struct Active<'a> {
    stats: &'a Stats,
    held: bool,
}

impl<'a> Active<'a> {
    fn enter(stats: &'a Stats) -> Self {
        let now = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak.fetch_max(now, Ordering::SeqCst);
        Self { stats, held: true }
    }

    fn release(&mut self) {
        if std::mem::take(&mut self.held) {
            self.stats.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for Active<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

fn read_request_path(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let request = String::from_utf8_lossy(&buf);
    let line = request.lines().next()?;
    let mut parts = line.split_whitespace();
    let _method = parts.next()?;
    Some(parts.next()?.to_string())
}

fn reason(code: u16) -> &'static str {
    match code {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    }
}

fn handle(mut stream: TcpStream, routes: &HashMap<String, Route>, stats: &Stats) {
    let mut active = Active::enter(stats);
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let Some(path) = read_request_path(&mut stream) else {
        return;
    };
    let hit = {
        let mut hits = stats.hits.lock().unwrap();
        let n = hits.entry(path.clone()).or_insert(0);
        *n += 1;
        *n
    };

    let route = match routes.get(&path) {
        Some(r) if hit <= r.fail_first => Route::status(500),
        Some(r) => r.clone(),
        None => Route::status(404),
    };

    let mut head = format!(
        "HTTP/1.1 {} {}\r\nConnection: close\r\n",
        route.status,
        reason(route.status)
    );
    if route.send_length {
        head.push_str(&format!("Content-Length: {}\r\n", route.body.len()));
    }
    head.push_str("\r\n");
    if stream.write_all(head.as_bytes()).is_err() {
        return;
    }

    let piece = route.body.len().div_ceil(route.chunks).max(1);
    let pieces: Vec<&[u8]> = route.body.chunks(piece).collect();
    for (i, part) in pieces.iter().enumerate() {
        if !route.chunk_delay.is_zero() {
            thread::sleep(route.chunk_delay);
        }
        // The client may finish as soon as the last byte lands; stop counting
        // this connection before that so the next request does not overlap.
        if i + 1 == pieces.len() {
            active.release();
        }
        if stream.write_all(part).and_then(|_| stream.flush()).is_err() {
            return;
        }
    }
    if !route.chunk_delay.is_zero() && route.body.is_empty() {
        thread::sleep(route.chunk_delay);
    }
    let _ = stream.shutdown(std::net::Shutdown::Write);
}
