// SPDX-FileCopyrightText: © 2025 Tunercast Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! End-to-end viewer scenarios: shared broadcast fan-out, registry
//! deduplication and tear-down, the WebSocket transport, transcoder
//! isolation, and graceful shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout, Duration};

use tunercast_server::broadcast::SourceSpec;
use tunercast_server::state::AppState;
use tunercast_server::Config;

const PATTERN_BLOCK: usize = 4096;
const ONE_MIB: usize = 1024 * 1024;

/// A block of the repeating `0x00..=0xFF` upstream pattern.
fn pattern_block() -> Bytes {
    Bytes::from((0..PATTERN_BLOCK).map(|i| (i % 256) as u8).collect::<Vec<u8>>())
}

/// Infinite upstream serving the repeating byte pattern. Delays the first
/// block so viewers connecting at test start attach before any write and
/// therefore observe identical streams from byte zero.
async fn pattern_stream(State(gets): State<Arc<AtomicUsize>>) -> Body {
    gets.fetch_add(1, Ordering::SeqCst);
    let stream = futures_util::stream::unfold(true, |first| async move {
        if first {
            sleep(Duration::from_millis(200)).await;
        }
        Some((Ok::<Bytes, std::convert::Infallible>(pattern_block()), false))
    });
    Body::from_stream(stream)
}

struct Upstream {
    addr: SocketAddr,
    gets: Arc<AtomicUsize>,
}

async fn bind(addr: &str) -> Option<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => Some(listener),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => None,
        Err(e) => panic!("Failed to bind test listener: {e}"),
    }
}

async fn start_upstream() -> Option<Upstream> {
    let gets = Arc::new(AtomicUsize::new(0));
    let router =
        Router::new().route("/pattern", get(pattern_stream)).with_state(Arc::clone(&gets));
    let listener = bind("127.0.0.1:0").await?;
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Some(Upstream { addr, gets })
}

struct TestApp {
    addr: SocketAddr,
    state: Arc<AppState>,
    _channel_dir: tempfile::TempDir,
}

/// Serve the tuner app over a lineup containing one proxy channel ("1")
/// pointing at the upstream pattern endpoint, plus an rtsp channel ("2").
async fn start_app(upstream: SocketAddr, ffmpeg: &str) -> Option<TestApp> {
    let channel_dir = tempfile::tempdir().unwrap();
    let channel_path = channel_dir.path().join("channels.json");
    std::fs::write(
        &channel_path,
        format!(
            r#"[
                {{"id": "1", "name": "Pattern", "url": "http://{upstream}/pattern", "type": "proxy"}},
                {{"id": "2", "name": "Cam", "url": "rtsp://cam/1", "type": "rtsp"}}
            ]"#
        ),
    )
    .unwrap();

    let config = Config {
        id: "TESTDEV01".to_string(),
        tuner_count: 2,
        listen: "127.0.0.1:0".to_string(),
        ffmpeg: ffmpeg.to_string(),
        channel: channel_path.to_string_lossy().into_owned(),
        log: String::new(),
    };

    let listener = bind("127.0.0.1:0").await?;
    let addr = listener.local_addr().unwrap();
    let (app, state) = tunercast_server::create_app(config);
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    sleep(Duration::from_millis(50)).await;
    Some(TestApp { addr, state, _channel_dir: channel_dir })
}

/// Read exactly `len` bytes of a streaming response body.
async fn read_prefix(response: reqwest::Response, len: usize) -> Vec<u8> {
    let mut stream = response.bytes_stream();
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        let chunk = timeout(Duration::from_secs(10), stream.next())
            .await
            .expect("body read timed out")
            .expect("body ended early")
            .expect("body errored");
        out.extend_from_slice(&chunk);
    }
    out.truncate(len);
    out
}

async fn wait_until_registry_empty(state: &Arc<AppState>) {
    for _ in 0..100 {
        if state.registry.is_empty().await {
            return;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("registry entry was not torn down");
}

#[tokio::test]
async fn two_viewers_share_one_upstream_fetch() {
    let Some(upstream) = start_upstream().await else { return };
    let Some(app) = start_app(upstream.addr, "").await else { return };

    let url = format!("http://{}/stream/1", app.addr);
    let first = reqwest::get(&url);
    let second = reqwest::get(&url);
    let (first, second) = tokio::join!(first, second);
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_eq!(first.headers()["content-type"], "video/mp4");

    let (a, b) =
        tokio::join!(read_prefix(first, ONE_MIB), read_prefix(second, ONE_MIB));
    assert_eq!(a, b, "both viewers must observe the same byte stream");
    assert_eq!(&a[..PATTERN_BLOCK], &pattern_block()[..], "stream starts at the pattern origin");

    assert_eq!(upstream.gets.load(Ordering::SeqCst), 1, "one upstream GET for both viewers");
}

#[tokio::test]
async fn first_disconnect_leaves_second_viewer_streaming() {
    let Some(upstream) = start_upstream().await else { return };
    let Some(app) = start_app(upstream.addr, "").await else { return };

    let url = format!("http://{}/stream/1", app.addr);
    let (first, second) = tokio::join!(reqwest::get(&url), reqwest::get(&url));
    let (first, second) = (first.unwrap(), second.unwrap());

    let mut second_stream = second.bytes_stream();
    // Let both streams run, then hang up the first viewer mid-stream.
    let _ = timeout(Duration::from_secs(5), second_stream.next()).await.unwrap();
    drop(first);

    // The second viewer keeps receiving bytes.
    let mut received = 0usize;
    while received < 64 * 1024 {
        let chunk = timeout(Duration::from_secs(5), second_stream.next())
            .await
            .expect("stream stalled after first disconnect")
            .expect("stream ended after first disconnect")
            .expect("stream errored after first disconnect");
        received += chunk.len();
    }
    assert_eq!(upstream.gets.load(Ordering::SeqCst), 1);

    // Once the last viewer hangs up, the broadcast entry disappears.
    drop(second_stream);
    wait_until_registry_empty(&app.state).await;
}

#[tokio::test]
async fn concurrent_acquires_share_one_start_and_release_tears_down() {
    let Some(upstream) = start_upstream().await else { return };
    let Some(app) = start_app(upstream.addr, "").await else { return };

    let spec = SourceSpec::Progressive { url: format!("http://{}/pattern", upstream.addr) };
    let readers = futures_util::future::join_all(
        (0..4).map(|_| app.state.registry.acquire(&spec)),
    )
    .await;
    let readers: Vec<_> = readers.into_iter().map(|reader| reader.unwrap()).collect();

    assert_eq!(upstream.gets.load(Ordering::SeqCst), 1, "one producer start for 4 viewers");
    assert_eq!(app.state.registry.len().await, 1);

    for (i, reader) in readers.into_iter().enumerate() {
        assert!(app.state.registry.contains(&spec.key()).await, "entry alive before release {i}");
        reader.release().await;
    }
    assert!(app.state.registry.is_empty().await, "entry removed on the last release");

    // Re-acquiring constructs a fresh producer.
    let reader = app.state.registry.acquire(&spec).await.unwrap();
    assert_eq!(upstream.gets.load(Ordering::SeqCst), 2);
    reader.release().await;
    wait_until_registry_empty(&app.state).await;
}

#[tokio::test]
async fn websocket_viewer_receives_bounded_binary_messages() {
    let Some(upstream) = start_upstream().await else { return };
    let Some(app) = start_app(upstream.addr, "").await else { return };

    let (mut socket, _response) =
        tokio_tungstenite::connect_async(format!("ws://{}/stream/1", app.addr)).await.unwrap();

    let mut received = Vec::new();
    while received.len() < 256 * 1024 {
        let message = timeout(Duration::from_secs(10), socket.next())
            .await
            .expect("websocket stalled")
            .expect("websocket closed early")
            .expect("websocket errored");
        if let tokio_tungstenite::tungstenite::Message::Binary(data) = message {
            assert!(data.len() <= 100 * 1024, "messages must stay under the frame cap");
            received.extend_from_slice(&data);
        }
    }
    assert_eq!(&received[..PATTERN_BLOCK], &pattern_block()[..]);

    drop(socket);
    wait_until_registry_empty(&app.state).await;
}

#[cfg(unix)]
#[tokio::test]
async fn transcode_viewers_get_independent_children() {
    use std::os::unix::fs::PermissionsExt;

    let Some(upstream) = start_upstream().await else { return };

    // Stub transcoder: emits a marker then idles like a long-running remux.
    let dir = tempfile::tempdir().unwrap();
    let stub = dir.path().join("fake-transcoder");
    std::fs::write(&stub, "#!/bin/sh\nprintf 'frag-mp4'\nexec sleep 600\n").unwrap();
    std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();

    let Some(app) = start_app(upstream.addr, &stub.to_string_lossy()).await else { return };

    let url = format!("http://{}/stream/2", app.addr);
    let (first, second) = tokio::join!(reqwest::get(&url), reqwest::get(&url));
    let (first, second) = (first.unwrap(), second.unwrap());

    // First viewer reads its child's marker, then hangs up (read_prefix
    // consumes and drops the response).
    let head_a = read_prefix(first, 8).await;
    assert_eq!(head_a, b"frag-mp4");

    let mut second_stream = second.bytes_stream();
    let head_b = timeout(Duration::from_secs(5), second_stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(&head_b[..], b"frag-mp4");

    // The second viewer's child is unaffected by the first one's death: its
    // stream stays open (and quiet, since the stub emits nothing further).
    let still_open = timeout(Duration::from_millis(300), second_stream.next()).await;
    assert!(still_open.is_err(), "second transcoder stream should remain open");

    // Transcode streams never enter the shared registry.
    assert!(app.state.registry.is_empty().await);
}

#[tokio::test]
async fn shutdown_cascade_ends_live_viewers() {
    let Some(upstream) = start_upstream().await else { return };
    let Some(app) = start_app(upstream.addr, "").await else { return };

    let response = reqwest::get(format!("http://{}/stream/1", app.addr)).await.unwrap();
    let mut stream = response.bytes_stream();
    let _ = timeout(Duration::from_secs(5), stream.next()).await.unwrap();

    // Root-scope cancellation: tear down every broadcast.
    app.state.shutdown.cancel();
    app.state.registry.shutdown().await;

    // The viewer's stream terminates within bounded time.
    let ended = timeout(Duration::from_secs(2), async {
        while let Some(chunk) = stream.next().await {
            if chunk.is_err() {
                break;
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "viewer stream should end after shutdown");
}
