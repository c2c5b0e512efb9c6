// SPDX-FileCopyrightText: © 2025 Tunercast Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Progressive HTTP source - a single long-lived GET exposed as a byte reader.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use tunercast_core::{Result, StreamError};

use crate::client::http_client;
use crate::source::{take_from_chunk, MediaSource};

/// Streams the response body of one long-lived HTTP GET.
pub struct HttpSource {
    url: String,
    stream: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    current: Option<Bytes>,
    token: CancellationToken,
}

impl HttpSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), stream: None, current: None, token: CancellationToken::new() }
    }
}

#[async_trait]
impl MediaSource for HttpSource {
    async fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let client = http_client()?;
        let response = tokio::select! {
            () = self.token.cancelled() => return Err(StreamError::ReadClosed),
            sent = client.get(&self.url).send() => sent
                .map_err(|e| StreamError::Upstream(format!("GET {} failed: {e}", self.url)))?,
        };
        if !response.status().is_success() {
            return Err(StreamError::Upstream(format!(
                "GET {} returned status {}",
                self.url,
                response.status()
            )));
        }
        self.stream = Some(response.bytes_stream().boxed());
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.token.is_cancelled() {
            return Err(StreamError::ReadClosed);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(StreamError::Upstream("source not started".to_string()));
        };
        loop {
            if let Some(n) = take_from_chunk(&mut self.current, buf) {
                return Ok(n);
            }
            tokio::select! {
                () = self.token.cancelled() => return Err(StreamError::ReadClosed),
                next = stream.next() => match next {
                    Some(Ok(chunk)) => self.current = Some(chunk),
                    Some(Err(e)) => {
                        return Err(StreamError::Upstream(format!("body read failed: {e}")));
                    }
                    None => return Ok(0),
                },
            }
        }
    }

    fn cancel_token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for HttpSource {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::routing::get;
    use axum::Router;
    use tokio::time::timeout;

    use super::*;
    use crate::test_util::serve_mock;

    #[tokio::test]
    async fn test_streams_body_to_eof() {
        let router = Router::new().route("/video.mp4", get(|| async { b"mp4-payload".to_vec() }));
        let Some(addr) = serve_mock(router).await else {
            tracing::warn!("skipping: local TCP bind not permitted");
            return;
        };

        let mut source = HttpSource::new(format!("http://{addr}/video.mp4"));
        source.start().await.unwrap();

        let mut out = Vec::new();
        let mut buf = [0u8; 4];
        loop {
            match source.read(&mut buf).await.unwrap() {
                0 => break,
                n => out.extend_from_slice(&buf[..n]),
            }
        }
        assert_eq!(out, b"mp4-payload");
    }

    #[tokio::test]
    async fn test_error_status_fails_start() {
        let router = Router::new().route(
            "/missing",
            get(|| async { (axum::http::StatusCode::NOT_FOUND, "nope") }),
        );
        let Some(addr) = serve_mock(router).await else {
            tracing::warn!("skipping: local TCP bind not permitted");
            return;
        };

        let mut source = HttpSource::new(format!("http://{addr}/missing"));
        let err = source.start().await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_read() {
        // An endpoint that sends one chunk and then stalls forever.
        let router = Router::new().route(
            "/stall",
            get(|| async {
                let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes>>(1);
                tx.send(Ok(Bytes::from_static(b"head"))).await.unwrap();
                // Keep the sender alive so the body never ends.
                tokio::spawn(async move {
                    let _tx = tx;
                    tokio::time::sleep(Duration::from_secs(600)).await;
                });
                axum::body::Body::from_stream(tokio_stream::wrappers::ReceiverStream::new(rx))
            }),
        );
        let Some(addr) = serve_mock(router).await else {
            tracing::warn!("skipping: local TCP bind not permitted");
            return;
        };

        let mut source = HttpSource::new(format!("http://{addr}/stall"));
        source.start().await.unwrap();

        let mut buf = [0u8; 16];
        let n = source.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"head");

        let token = source.cancel_token().clone();
        let pending = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            source.read(&mut buf).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let result = timeout(Duration::from_secs(1), pending).await.unwrap().unwrap();
        assert!(matches!(result, Err(StreamError::ReadClosed)));
    }
}
