// SPDX-FileCopyrightText: © 2025 Tunercast Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Transcoder pipe source.
//!
//! Spawns an external transcoder producing fragmented MP4 on stdout and
//! exposes that pipe as a byte reader. Used for upstreams (RTSP) that are not
//! directly representable as a byte stream without remuxing.

use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tunercast_core::{Result, StreamError};

use crate::source::{take_from_chunk, MediaSource};

const STDOUT_CHUNK: usize = 32 * 1024;

/// One external transcoder child per viewer; never shared.
pub struct TranscoderSource {
    program: String,
    input_url: String,
    stdout_rx: Option<mpsc::Receiver<Bytes>>,
    current: Option<Bytes>,
    token: CancellationToken,
}

impl TranscoderSource {
    pub fn new(program: impl Into<String>, input_url: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            input_url: input_url.into(),
            stdout_rx: None,
            current: None,
            token: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl MediaSource for TranscoderSource {
    async fn start(&mut self) -> Result<()> {
        if self.stdout_rx.is_some() {
            return Ok(());
        }
        let mut child = Command::new(&self.program)
            .args([
                "-i",
                &self.input_url,
                "-c",
                "copy",
                "-f",
                "mp4",
                "-movflags",
                "frag_keyframe+empty_moov+default_base_moof",
                "-g",
                "52",
                "-y",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| StreamError::Upstream("transcoder stdout unavailable".to_string()))?;

        let (tx, rx) = mpsc::channel(1);
        self.stdout_rx = Some(rx);
        tokio::spawn(forward_stdout(child, stdout, tx, self.token.clone()));
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.token.is_cancelled() {
            return Err(StreamError::ReadClosed);
        }
        let Some(rx) = self.stdout_rx.as_mut() else {
            return Err(StreamError::Upstream("source not started".to_string()));
        };
        loop {
            if let Some(n) = take_from_chunk(&mut self.current, buf) {
                return Ok(n);
            }
            tokio::select! {
                () = self.token.cancelled() => return Err(StreamError::ReadClosed),
                received = rx.recv() => match received {
                    Some(chunk) => self.current = Some(chunk),
                    None => return Ok(0),
                },
            }
        }
    }

    fn cancel_token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for TranscoderSource {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Owns the child: pumps its stdout into the hand-off channel, then kills and
/// reaps it on cancellation, downstream loss, or pipe end.
async fn forward_stdout(
    mut child: Child,
    mut stdout: ChildStdout,
    tx: mpsc::Sender<Bytes>,
    token: CancellationToken,
) {
    let mut buf = vec![0u8; STDOUT_CHUNK];
    loop {
        let n = tokio::select! {
            () = token.cancelled() => break,
            read = stdout.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(error = %e, "transcoder stdout read failed");
                    break;
                }
            },
        };
        let chunk = Bytes::copy_from_slice(&buf[..n]);
        tokio::select! {
            () = token.cancelled() => break,
            sent = tx.send(chunk) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "transcoder child already exited");
    }
}
