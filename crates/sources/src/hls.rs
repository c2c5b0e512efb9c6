// SPDX-FileCopyrightText: © 2025 Tunercast Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! HLS pull source.
//!
//! A background loop polls the media playlist, downloads each poll's new
//! segments with bounded parallelism into a [`ChunkBuffer`] window, and
//! queues the windows for the reader. The reader drains windows in creation
//! order, so emitted bytes follow playlist order even though segment
//! downloads complete out of order.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use tunercast_core::{retry, ChunkBuffer, Result, StreamError};

use crate::client::http_client;
use crate::playlist::{self, MediaPlaylist};
use crate::source::MediaSource;

/// Upper bound on concurrent segment downloads, and equally on queued
/// windows: the poll loop stalls once this many windows await consumption.
const MAX_CONCURRENT_FETCHES: usize = 5;
const WINDOW_QUEUE_DEPTH: usize = MAX_CONCURRENT_FETCHES;
/// Attempts per upstream fetch (playlist, init map, segment).
const FETCH_ATTEMPTS: usize = 3;
/// Poll delay when the playlist listed no segments at all.
const EMPTY_PLAYLIST_POLL: Duration = Duration::from_secs(1);

/// Live HLS source: playlist poll loop plus ordered window reassembly.
pub struct HlsSource {
    playlist_url: Url,
    windows: mpsc::Receiver<Arc<ChunkBuffer>>,
    /// Send side, handed to the poll loop by `start`.
    loop_tx: Option<mpsc::Sender<Arc<ChunkBuffer>>>,
    current: Option<Arc<ChunkBuffer>>,
    /// Sticky failure from the poll loop, surfaced once the queue drains.
    error: Arc<OnceLock<String>>,
    token: CancellationToken,
}

impl HlsSource {
    pub fn new(playlist_url: Url) -> Self {
        let (loop_tx, windows) = mpsc::channel(WINDOW_QUEUE_DEPTH);
        Self {
            playlist_url,
            windows,
            loop_tx: Some(loop_tx),
            current: None,
            error: Arc::new(OnceLock::new()),
            token: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl MediaSource for HlsSource {
    async fn start(&mut self) -> Result<()> {
        let Some(windows) = self.loop_tx.take() else {
            return Ok(());
        };
        tokio::spawn(poll_loop(
            self.playlist_url.clone(),
            windows,
            Arc::clone(&self.error),
            self.token.clone(),
        ));
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.token.is_cancelled() {
            return Err(StreamError::ReadClosed);
        }
        loop {
            if let Some(window) = self.current.as_ref() {
                let n = tokio::select! {
                    () = self.token.cancelled() => return Err(StreamError::ReadClosed),
                    read = window.read(buf) => read?,
                };
                if n > 0 {
                    return Ok(n);
                }
                // Window fully drained; move on to the next one.
                self.current = None;
            }
            tokio::select! {
                () = self.token.cancelled() => return Err(StreamError::ReadClosed),
                received = self.windows.recv() => match received {
                    Some(window) => self.current = Some(window),
                    None => {
                        return Err(self.error.get().map_or(StreamError::ReadClosed, |msg| {
                            StreamError::Upstream(msg.clone())
                        }));
                    }
                },
            }
        }
    }

    fn cancel_token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for HlsSource {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Resolve a segment or map URI against the playlist URL.
fn resolve_uri(base: &Url, uri: &str) -> Result<Url> {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        Url::parse(uri).map_err(|e| StreamError::Playlist(format!("bad absolute uri {uri}: {e}")))
    } else {
        base.join(uri).map_err(|e| StreamError::Playlist(format!("bad relative uri {uri}: {e}")))
    }
}

async fn poll_loop(
    playlist_url: Url,
    windows: mpsc::Sender<Arc<ChunkBuffer>>,
    error: Arc<OnceLock<String>>,
    token: CancellationToken,
) {
    // Dropping `windows` on return closes the queue; the reader then surfaces
    // the latched error, or a plain closed-read if the loop was cancelled.
    let fail = |err: &StreamError| {
        tracing::warn!(url = %playlist_url, error = %err, "playlist loop terminated");
        let _ = error.set(err.to_string());
    };

    let client = match http_client() {
        Ok(client) => client,
        Err(e) => return fail(&e),
    };

    let mut last_sequence: u64 = 0;
    loop {
        if token.is_cancelled() {
            return;
        }

        let playlist =
            match retry(FETCH_ATTEMPTS, || fetch_playlist(client, &playlist_url, &token)).await {
                Ok(playlist) => playlist,
                Err(e) => return fail(&e),
            };
        let poll_started = Instant::now();

        // The init map is fetched once per poll and prepended to every
        // segment of the window, so a viewer that joins mid-stream still
        // receives codec initialization ahead of its first fragment.
        let init_map = match playlist.map_uri.as_deref() {
            Some(uri) => {
                let map_url = match resolve_uri(&playlist_url, uri) {
                    Ok(map_url) => map_url,
                    Err(e) => return fail(&e),
                };
                match retry(FETCH_ATTEMPTS, || fetch_bytes(client, map_url.clone(), &token)).await
                {
                    Ok(bytes) => bytes,
                    Err(e) => return fail(&e),
                }
            }
            None => Bytes::new(),
        };

        let mut first_duration = None;
        let mut new_segments = Vec::new();
        for segment in &playlist.segments {
            // Latch the first nonzero duration; a playlist of only
            // zero-duration segments paces like an empty one below.
            if first_duration.is_none() && !segment.duration.is_zero() {
                first_duration = Some(segment.duration);
            }
            if segment.sequence <= last_sequence {
                continue;
            }
            match resolve_uri(&playlist_url, &segment.uri) {
                Ok(segment_url) => new_segments.push(segment_url),
                Err(e) => return fail(&e),
            }
            // The cursor advances for every accepted segment rather than to
            // the maximum of the pass; a playlist listing sequence ids out of
            // order will have later-but-lower ids skipped.
            last_sequence = segment.sequence;
        }

        if !new_segments.is_empty() {
            tracing::debug!(
                url = %playlist_url,
                count = new_segments.len(),
                last_sequence,
                "downloading segment window"
            );
            if let Err(e) =
                download_window(client, &token, &windows, &init_map, new_segments).await
            {
                return fail(&e);
            }
        }

        let sleep_for = first_duration
            .map_or(EMPTY_PLAYLIST_POLL, |duration| duration.saturating_sub(poll_started.elapsed()));
        if !sleep_for.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(sleep_for) => {}
                () = token.cancelled() => return,
            }
        }
    }
}

/// Download one window of segments into a fresh [`ChunkBuffer`].
///
/// The buffer is published to the queue before any download begins so the
/// reader can drain early slots while later ones are still in flight. On a
/// permanent fetch failure the buffer is closed (the reader observes a
/// closed-read on that window) and the error propagates to the loop.
async fn download_window(
    client: &'static reqwest::Client,
    token: &CancellationToken,
    windows: &mpsc::Sender<Arc<ChunkBuffer>>,
    init_map: &Bytes,
    segments: Vec<Url>,
) -> Result<()> {
    let buffer = Arc::new(ChunkBuffer::new(segments.len()));

    tokio::select! {
        sent = windows.send(Arc::clone(&buffer)) => {
            if sent.is_err() {
                // Reader side is gone; nothing left to deliver to.
                return Ok(());
            }
        }
        () = token.cancelled() => return Ok(()),
    }

    let mut fetches = futures::stream::iter(segments.into_iter().enumerate().map(
        |(index, segment_url)| {
            let buffer = Arc::clone(&buffer);
            let init_map = init_map.clone();
            let token = token.clone();
            async move {
                let data = retry(FETCH_ATTEMPTS, || {
                    fetch_segment(client, segment_url.clone(), &init_map, &token)
                })
                .await?;
                buffer.fill(index, data)
            }
        },
    ))
    .buffer_unordered(MAX_CONCURRENT_FETCHES);

    while let Some(result) = fetches.next().await {
        if let Err(err) = result {
            buffer.close();
            return Err(err);
        }
    }
    Ok(())
}

async fn fetch_playlist(
    client: &reqwest::Client,
    url: &Url,
    token: &CancellationToken,
) -> Result<MediaPlaylist> {
    let text = tokio::select! {
        () = token.cancelled() => return Err(StreamError::ReadClosed),
        fetched = async {
            let response = client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| StreamError::Upstream(format!("GET {url} failed: {e}")))?;
            if !response.status().is_success() {
                return Err(StreamError::Upstream(format!(
                    "GET {url} returned status {}",
                    response.status()
                )));
            }
            response
                .text()
                .await
                .map_err(|e| StreamError::Upstream(format!("playlist read failed: {e}")))
        } => fetched?,
    };
    playlist::parse(&text)
}

async fn fetch_bytes(
    client: &reqwest::Client,
    url: Url,
    token: &CancellationToken,
) -> Result<Bytes> {
    tokio::select! {
        () = token.cancelled() => Err(StreamError::ReadClosed),
        fetched = async {
            let response = client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| StreamError::Upstream(format!("GET {url} failed: {e}")))?;
            if !response.status().is_success() {
                return Err(StreamError::Upstream(format!(
                    "GET {url} returned status {}",
                    response.status()
                )));
            }
            response
                .bytes()
                .await
                .map_err(|e| StreamError::Upstream(format!("body read failed: {e}")))
        } => fetched,
    }
}

async fn fetch_segment(
    client: &reqwest::Client,
    url: Url,
    init_map: &Bytes,
    token: &CancellationToken,
) -> Result<Bytes> {
    let body = fetch_bytes(client, url, token).await?;
    if init_map.is_empty() {
        return Ok(body);
    }
    let mut combined = BytesMut::with_capacity(init_map.len() + body.len());
    combined.extend_from_slice(init_map);
    combined.extend_from_slice(&body);
    Ok(combined.freeze())
}
