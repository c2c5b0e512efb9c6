// SPDX-FileCopyrightText: © 2025 Tunercast Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Single-writer, many-reader broadcast pipe.
//!
//! A [`FanoutPipe`] distributes every written chunk to all attached
//! [`FanoutReader`]s with no internal buffering beyond a one-chunk hand-off
//! slot per reader. The writer completes a submission only once every live
//! reader has accepted the chunk or detached, so memory stays bounded by the
//! reader count and a stalled viewer backpressures the whole broadcast
//! instead of accumulating data.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use bytes::{Buf, Bytes};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StreamError};

#[derive(Clone)]
struct ReaderSlot {
    id: u64,
    tx: mpsc::Sender<Bytes>,
    token: CancellationToken,
}

struct PipeShared {
    readers: RwLock<Vec<ReaderSlot>>,
    token: CancellationToken,
    next_reader_id: AtomicU64,
}

/// One-writer, many-reader distribution pipe.
///
/// Cloning the handle is cheap; all clones drive the same pipe.
#[derive(Clone)]
pub struct FanoutPipe {
    shared: Arc<PipeShared>,
}

impl Default for FanoutPipe {
    fn default() -> Self {
        Self::new()
    }
}

impl FanoutPipe {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(PipeShared {
                readers: RwLock::new(Vec::new()),
                token: CancellationToken::new(),
                next_reader_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register a new reader. It observes every write submitted after this
    /// call, in submission order, until it or the pipe closes.
    pub fn attach(&self) -> FanoutReader {
        let (tx, rx) = mpsc::channel(1);
        let token = self.shared.token.child_token();
        let id = self.shared.next_reader_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut readers) = self.shared.readers.write() {
            readers.push(ReaderSlot { id, tx, token: token.clone() });
        }
        FanoutReader { shared: Arc::clone(&self.shared), id, rx, current: None, token }
    }

    /// Copy `data` once and hand the resulting chunk to every attached
    /// reader, blocking per reader until it accepts or detaches.
    ///
    /// Reports the full input length even when detached readers were skipped;
    /// only a cancellation of the pipe itself fails the write.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        if self.shared.token.is_cancelled() {
            return Err(StreamError::WriteClosed);
        }

        let chunk = Bytes::copy_from_slice(data);
        // Snapshot under the read lock; a reader detaching mid-iteration is
        // handled by its cancellation token below.
        let slots: Vec<ReaderSlot> = self
            .shared
            .readers
            .read()
            .map_err(|_| StreamError::WriteClosed)?
            .clone();

        for slot in slots {
            tokio::select! {
                () = slot.token.cancelled() => {}
                () = self.shared.token.cancelled() => return Err(StreamError::WriteClosed),
                sent = slot.tx.send(chunk.clone()) => {
                    // A dropped receiver is equivalent to a detach.
                    let _ = sent;
                }
            }
        }
        Ok(data.len())
    }

    /// Cancel the pipe scope. All reader scopes are nested in it, so every
    /// reader observes a closed-read failure once drained. Safe to call
    /// repeatedly.
    pub fn close(&self) {
        self.shared.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    /// Number of currently attached readers.
    pub fn reader_count(&self) -> usize {
        self.shared.readers.read().map_or(0, |readers| readers.len())
    }
}

/// Independent byte reader over one [`FanoutPipe`].
pub struct FanoutReader {
    shared: Arc<PipeShared>,
    id: u64,
    rx: mpsc::Receiver<Bytes>,
    current: Option<Bytes>,
    token: CancellationToken,
}

impl FanoutReader {
    /// Copy bytes from the next pending chunk into `buf`, blocking while the
    /// pipe is idle. Chunks already accepted are drained before a close is
    /// reported.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            if let Some(chunk) = self.current.as_mut() {
                if chunk.is_empty() {
                    self.current = None;
                    continue;
                }
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                chunk.advance(n);
                if chunk.is_empty() {
                    self.current = None;
                }
                return Ok(n);
            }

            // Prefer data that was handed off before the pipe closed.
            match self.rx.try_recv() {
                Ok(chunk) => {
                    self.current = Some(chunk);
                    continue;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => {}
            }

            tokio::select! {
                () = self.token.cancelled() => return Err(StreamError::ReadClosed),
                received = self.rx.recv() => match received {
                    Some(chunk) => self.current = Some(chunk),
                    None => return Err(StreamError::ReadClosed),
                },
            }
        }
    }

    /// Detach from the pipe. The reader is removed from the writer's set
    /// before this returns, so a subsequent write does not wait on it.
    /// Safe to call repeatedly.
    pub fn close(&mut self) {
        self.token.cancel();
        if let Ok(mut readers) = self.shared.readers.write() {
            readers.retain(|slot| slot.id != self.id);
        }
    }
}

impl Drop for FanoutReader {
    fn drop(&mut self) {
        self.close();
    }
}
