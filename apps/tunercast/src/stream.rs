// SPDX-FileCopyrightText: © 2025 Tunercast Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-viewer stream handler.
//!
//! Resolves the requested channel, obtains a byte reader (shared through the
//! broadcast registry, or a dedicated transcoder child), and copies bytes to
//! the viewer transport: a plain HTTP body, or binary WebSocket messages when
//! the request upgrades.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use url::Url;

use tunercast_core::{Result, StreamError};
use tunercast_sources::{MediaSource, TranscoderSource};

use crate::broadcast::{SharedReader, SourceSpec};
use crate::channels::{load_channels, Channel, ChannelKind};
use crate::state::AppState;

/// Copy granularity for plain HTTP bodies.
const BODY_CHUNK: usize = 32 * 1024;
/// Upper bound on one WebSocket binary message.
const WS_MESSAGE_BYTES: usize = 100 * 1024;

/// `GET /stream/{id}`
pub async fn stream_channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = ws.ok();
    let channels = match load_channels(&state.config.channel).await {
        Ok(channels) => channels,
        Err(e) => return internal_error(&e.to_string()),
    };
    let Some(channel) = channels.into_iter().find(|channel| channel.id == id) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    tracing::info!(
        channel = %channel.id,
        kind = ?channel.kind,
        websocket = ws.is_some(),
        "viewer tuned"
    );

    match channel.kind {
        ChannelKind::Redirect => Redirect::permanent(&channel.url).into_response(),
        ChannelKind::Rtsp => unshared_stream(&state, ws, &channel).await,
        ChannelKind::Proxy => {
            shared_stream(&state, ws, SourceSpec::Progressive { url: channel.url }).await
        }
        ChannelKind::Hls => match Url::parse(&channel.url) {
            Ok(playlist) => shared_stream(&state, ws, SourceSpec::Hls { playlist }).await,
            Err(e) => internal_error(&format!("bad playlist url {}: {e}", channel.url)),
        },
        ChannelKind::Bilibili => match state.resolver.resolve_hls(&channel.url).await {
            Ok(playlist) => shared_stream(&state, ws, SourceSpec::Hls { playlist }).await,
            Err(e) => internal_error(&e.to_string()),
        },
        ChannelKind::Unknown => internal_error("unsupported channel type"),
    }
}

/// Shared path: join (or create) the broadcast for this upstream.
async fn shared_stream(
    state: &AppState,
    ws: Option<WebSocketUpgrade>,
    spec: SourceSpec,
) -> Response {
    match state.registry.acquire(&spec).await {
        Ok(reader) => respond(ws, Viewer::Shared(reader)),
        Err(e) => internal_error(&e.to_string()),
    }
}

/// Unshared path: every viewer gets its own transcoder child.
async fn unshared_stream(
    state: &AppState,
    ws: Option<WebSocketUpgrade>,
    channel: &Channel,
) -> Response {
    let mut source = TranscoderSource::new(&state.config.ffmpeg, &channel.url);
    match source.start().await {
        Ok(()) => respond(ws, Viewer::Owned(source)),
        Err(e) => internal_error(&e.to_string()),
    }
}

/// One viewer's byte reader plus its tear-down.
enum Viewer {
    Shared(SharedReader),
    Owned(TranscoderSource),
}

impl Viewer {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Self::Shared(reader) => reader.read(buf).await,
            Self::Owned(source) => source.read(buf).await,
        }
    }

    async fn finish(self) {
        match self {
            Self::Shared(reader) => reader.release().await,
            Self::Owned(source) => source.close(),
        }
    }
}

fn respond(ws: Option<WebSocketUpgrade>, viewer: Viewer) -> Response {
    match ws {
        Some(upgrade) => upgrade.on_upgrade(move |socket| copy_to_socket(socket, viewer)),
        None => plain_body(viewer),
    }
}

/// Plain transport: a `video/mp4` body fed by a copy task. The task observes
/// client disconnects as send failures and releases the viewer on every exit
/// path.
fn plain_body(viewer: Viewer) -> Response {
    let (tx, rx) = mpsc::channel::<std::result::Result<Bytes, StreamError>>(1);
    tokio::spawn(copy_to_body(viewer, tx));

    let mut response = Body::from_stream(ReceiverStream::new(rx)).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    response.headers_mut().insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

async fn copy_to_body(
    mut viewer: Viewer,
    tx: mpsc::Sender<std::result::Result<Bytes, StreamError>>,
) {
    let mut buf = vec![0u8; BODY_CHUNK];
    loop {
        match viewer.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                    // Viewer hung up.
                    break;
                }
            }
            // Mid-stream upstream failure: the response simply ends.
            Err(_) => break,
        }
    }
    viewer.finish().await;
}

/// Upgraded transport: the byte stream framed into binary messages.
async fn copy_to_socket(mut socket: WebSocket, mut viewer: Viewer) {
    let mut buf = vec![0u8; WS_MESSAGE_BYTES];
    loop {
        match viewer.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if socket.send(Message::Binary(Bytes::copy_from_slice(&buf[..n]))).await.is_err()
                {
                    break;
                }
            }
        }
    }
    viewer.finish().await;
    let _ = socket.send(Message::Close(None)).await;
}

fn internal_error(message: &str) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, message.to_string()).into_response()
}
