//! Ranged HTTP source tests against a loopback server.

#![cfg(feature = "http")]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use vidpace::{
    ByteSource, HttpSource, PipelineOptions, ReadOutcome, SourceDescriptor, VidpaceError,
    open_source,
};

const BODY_LEN: usize = 4096;
const TIMEOUT: Duration = Duration::from_secs(5);

fn body() -> Vec<u8> {
    (0..BODY_LEN).map(|n| (n % 251) as u8).collect()
}

// ============================================================================
// Loopback server
// ============================================================================

/// Serves a router on its own runtime thread so the blocking client can run
/// on the test thread.
struct LoopbackServer {
    base_url: String,
    shutdown: Option<oneshot::Sender<()>>,
}

impl LoopbackServer {
    fn new(router: Router) -> Self {
        let (address_tx, address_rx) = mpsc::channel::<SocketAddr>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("build server runtime");
            runtime.block_on(async move {
                let listener = TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind loopback listener");
                address_tx
                    .send(listener.local_addr().expect("read listener address"))
                    .expect("report listener address");
                axum::serve(listener, router)
                    .with_graceful_shutdown(async {
                        shutdown_rx.await.ok();
                    })
                    .await
                    .expect("run loopback server");
            });
        });

        let address = address_rx.recv().expect("server thread started");
        Self {
            base_url: format!("http://{address}"),
            shutdown: Some(shutdown_tx),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl Drop for LoopbackServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

// ============================================================================
// Endpoints
// ============================================================================

#[derive(Clone, Default)]
struct Recorded {
    ranges: Arc<Mutex<Vec<String>>>,
    flaky_calls: Arc<AtomicUsize>,
}

impl Recorded {
    fn record(&self, headers: &HeaderMap) {
        if let Some(range) = headers.get(header::RANGE).and_then(|value| value.to_str().ok()) {
            self.ranges.lock().unwrap().push(range.to_string());
        }
    }

    fn ranges(&self) -> Vec<String> {
        self.ranges.lock().unwrap().clone()
    }
}

fn requested_range(headers: &HeaderMap) -> Option<(usize, usize)> {
    let value = headers.get(header::RANGE)?.to_str().ok()?;
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

fn partial(data: &[u8], headers: &HeaderMap) -> Response {
    match requested_range(headers) {
        Some((start, end)) if start < data.len() => {
            let end = end.min(data.len() - 1);
            (
                StatusCode::PARTIAL_CONTENT,
                [(
                    header::CONTENT_RANGE,
                    format!("bytes {start}-{end}/{}", data.len()),
                )],
                data[start..=end].to_vec(),
            )
                .into_response()
        }
        Some(_) => StatusCode::RANGE_NOT_SATISFIABLE.into_response(),
        None => data.to_vec().into_response(),
    }
}

async fn ranged(State(recorded): State<Recorded>, headers: HeaderMap) -> Response {
    recorded.record(&headers);
    partial(&body(), &headers)
}

async fn whole_body(State(recorded): State<Recorded>, headers: HeaderMap) -> Response {
    recorded.record(&headers);
    body().into_response()
}

async fn fails_once(State(recorded): State<Recorded>, headers: HeaderMap) -> Response {
    recorded.record(&headers);
    if recorded.flaky_calls.fetch_add(1, Ordering::SeqCst) == 0 {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    partial(&body(), &headers)
}

async fn head_with_length() -> impl IntoResponse {
    [(header::CONTENT_LENGTH, BODY_LEN.to_string())]
}

async fn head_refused() -> StatusCode {
    StatusCode::METHOD_NOT_ALLOWED
}

fn serve(recorded: &Recorded) -> LoopbackServer {
    let router = Router::new()
        .route("/clip.ts", get(ranged).head(head_with_length))
        .route("/no-length.ts", get(ranged).head(head_refused))
        .route("/ignores-range.ts", get(whole_body).head(head_with_length))
        .route("/flaky.ts", get(fails_once).head(head_with_length))
        .with_state(recorded.clone());
    LoopbackServer::new(router)
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn reads_request_exactly_the_wanted_span() {
    let recorded = Recorded::default();
    let server = serve(&recorded);
    let expected = body();

    let mut source = HttpSource::open(&server.url("/clip.ts"), None, TIMEOUT).unwrap();
    assert_eq!(source.size(), BODY_LEN as u64);

    let mut buffer = [0u8; 64];
    assert_eq!(source.read_at(100, &mut buffer), ReadOutcome::Filled(64));
    assert_eq!(&buffer[..], &expected[100..164]);

    assert_eq!(source.read_at(4090, &mut buffer), ReadOutcome::Filled(6));
    assert_eq!(&buffer[..6], &expected[4090..]);

    assert_eq!(source.read_at(BODY_LEN as u64, &mut buffer), ReadOutcome::End);
    assert_eq!(recorded.ranges(), vec!["bytes=100-163", "bytes=4090-4095"]);
}

#[test]
fn size_probe_falls_back_to_content_range() {
    let recorded = Recorded::default();
    let server = serve(&recorded);

    let source = HttpSource::open(&server.url("/no-length.ts"), None, TIMEOUT).unwrap();
    assert_eq!(source.size(), BODY_LEN as u64);
    assert_eq!(recorded.ranges(), vec!["bytes=0-0"]);
}

#[test]
fn known_size_skips_the_probe() {
    let recorded = Recorded::default();
    let server = serve(&recorded);

    let source = HttpSource::open(&server.url("/no-length.ts"), Some(1234), TIMEOUT).unwrap();
    assert_eq!(source.size(), 1234);
    assert!(recorded.ranges().is_empty());
}

#[test]
fn failed_fetch_latches_the_source() {
    let recorded = Recorded::default();
    let server = serve(&recorded);

    let mut source = HttpSource::open(&server.url("/flaky.ts"), None, TIMEOUT).unwrap();
    let mut buffer = [0u8; 16];
    assert_eq!(source.read_at(0, &mut buffer), ReadOutcome::End);
    // The server would answer now, but the source stays ended.
    assert_eq!(source.read_at(0, &mut buffer), ReadOutcome::End);
    assert_eq!(source.read_at(512, &mut buffer), ReadOutcome::End);
    assert_eq!(recorded.ranges().len(), 1);
}

#[test]
fn full_body_answers_only_serve_the_first_range() {
    let recorded = Recorded::default();
    let server = serve(&recorded);
    let expected = body();

    let mut source = HttpSource::open(&server.url("/ignores-range.ts"), None, TIMEOUT).unwrap();
    let mut buffer = [0u8; 16];
    assert_eq!(source.read_at(0, &mut buffer), ReadOutcome::Filled(16));
    assert_eq!(&buffer[..], &expected[..16]);

    assert_eq!(source.read_at(1024, &mut buffer), ReadOutcome::End);
    assert_eq!(source.read_at(0, &mut buffer), ReadOutcome::End);
    assert_eq!(recorded.ranges().len(), 2);
}

#[test]
fn missing_resource_is_unavailable() {
    let recorded = Recorded::default();
    let server = serve(&recorded);

    let result = HttpSource::open(&server.url("/missing.ts"), None, TIMEOUT);
    assert!(matches!(
        result,
        Err(VidpaceError::SourceUnavailable { ref locator, .. }) if locator.ends_with("/missing.ts")
    ));
}

#[test]
fn small_remote_sources_are_downloaded_once() {
    let recorded = Recorded::default();
    let server = serve(&recorded);

    let mut source = open_source(
        SourceDescriptor::Remote {
            url: server.url("/clip.ts"),
            size: None,
        },
        &PipelineOptions::default(),
    )
    .unwrap();
    assert_eq!(recorded.ranges(), vec!["bytes=0-4095"]);

    let mut buffer = [0u8; 32];
    assert_eq!(source.read_at(2048, &mut buffer), ReadOutcome::Filled(32));
    assert_eq!(recorded.ranges().len(), 1);
}

#[test]
fn large_remote_sources_stay_ranged() {
    let recorded = Recorded::default();
    let server = serve(&recorded);

    let mut source = open_source(
        SourceDescriptor::Remote {
            url: server.url("/clip.ts"),
            size: None,
        },
        &PipelineOptions::new().with_buffer_ceiling(1024),
    )
    .unwrap();
    assert_eq!(recorded.ranges(), vec!["bytes=0-0"]);

    let mut buffer = [0u8; 32];
    assert_eq!(source.read_at(2048, &mut buffer), ReadOutcome::Filled(32));
    assert_eq!(recorded.ranges(), vec!["bytes=0-0", "bytes=2048-2079"]);
}

#[test]
fn failing_first_read_rejects_the_open() {
    let recorded = Recorded::default();
    let server = serve(&recorded);

    let result = open_source(
        SourceDescriptor::Remote {
            url: server.url("/flaky.ts"),
            size: None,
        },
        &PipelineOptions::new().with_buffer_ceiling(1024),
    );
    assert!(matches!(result, Err(VidpaceError::SourceUnavailable { .. })));
}
