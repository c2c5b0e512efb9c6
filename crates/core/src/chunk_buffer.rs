// SPDX-FileCopyrightText: © 2025 Tunercast Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Ordered, index-addressable chunk buffer.
//!
//! A [`ChunkBuffer`] holds a fixed number of slots that writers fill out of
//! order while a reader drains them strictly in slot order. The HLS pull loop
//! uses one buffer per playlist window so segment downloads can run in
//! parallel without reordering the emitted bytes.

use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::Notify;

use crate::error::{Result, StreamError};

struct BufferState {
    slots: Vec<Option<Bytes>>,
    /// Index of the slot the reader is currently draining.
    cursor: usize,
    /// Read offset within the current slot.
    offset: usize,
    closed: bool,
}

/// A single-reader, many-writer ordered buffer of byte chunks.
///
/// Slots are bound once via [`fill`](Self::fill) and never mutated afterwards;
/// [`read`](Self::read) blocks until the slot under the cursor is filled,
/// drains it fully, then advances. End of stream is reported once the cursor
/// passes the last slot. [`close`](Self::close) aborts the buffer: pending and
/// subsequent reads fail with [`StreamError::ReadClosed`] even if filled slots
/// remain.
pub struct ChunkBuffer {
    state: Mutex<BufferState>,
    notify: Notify,
}

impl ChunkBuffer {
    /// Allocate a buffer with `len` empty slots.
    pub fn new(len: usize) -> Self {
        Self {
            state: Mutex::new(BufferState {
                slots: vec![None; len],
                cursor: 0,
                offset: 0,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.state.lock().map_or(0, |state| state.slots.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bind slot `index` to `data` and wake the reader.
    ///
    /// Filling a slot twice replaces it; callers are expected to fill each
    /// slot once.
    pub fn fill(&self, index: usize, data: Bytes) -> Result<()> {
        {
            let mut state = self.state.lock().map_err(|_| StreamError::WriteClosed)?;
            if state.closed {
                return Err(StreamError::WriteClosed);
            }
            if index >= state.slots.len() {
                return Err(StreamError::ChunkIndexOutOfBounds {
                    index,
                    len: state.slots.len(),
                });
            }
            state.slots[index] = Some(data);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Copy bytes from the current slot into `buf`, blocking until that slot
    /// is filled or the buffer is closed.
    ///
    /// Returns `Ok(0)` once every slot has been drained. A zero-length chunk
    /// in a non-final slot is skipped, not reported as end of stream.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            // Register for wake-ups before inspecting state so a fill or
            // close between the check and the await is not lost.
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().map_err(|_| StreamError::ReadClosed)?;
                if state.closed {
                    return Err(StreamError::ReadClosed);
                }
                if state.cursor >= state.slots.len() {
                    return Ok(0);
                }
                if let Some(chunk) = state.slots[state.cursor].clone() {
                    let available = chunk.len() - state.offset;
                    if available == 0 {
                        state.cursor += 1;
                        state.offset = 0;
                        continue;
                    }
                    let n = available.min(buf.len());
                    let start = state.offset;
                    buf[..n].copy_from_slice(&chunk[start..start + n]);
                    state.offset += n;
                    if state.offset == chunk.len() {
                        state.cursor += 1;
                        state.offset = 0;
                    }
                    drop(state);
                    // Self-signal so a second reader parked on the same
                    // buffer re-checks the new cursor position.
                    self.notify.notify_waiters();
                    return Ok(n);
                }
            }
            notified.await;
        }
    }

    /// Close the buffer and wake all waiters. Safe to call repeatedly.
    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
        self.notify.notify_waiters();
    }
}
