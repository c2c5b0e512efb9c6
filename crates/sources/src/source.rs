// SPDX-FileCopyrightText: © 2025 Tunercast Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The common contract for all upstream media sources.

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use tokio_util::sync::CancellationToken;

use tunercast_core::Result;

/// A started byte producer backing one channel stream.
///
/// `start` is one-shot and may perform blocking I/O (connecting, forking a
/// transcoder). `read` yields `Ok(0)` at end of stream and
/// [`StreamError::ReadClosed`](tunercast_core::StreamError::ReadClosed) once
/// the source is closed. Every source owns a cancellation scope; `close`
/// cancels it, which promptly unblocks any pending read and aborts background
/// work. Closing is idempotent and may be invoked from a different task than
/// the reader: the registry keeps a close handle while the pump task owns
/// the source exclusively.
#[async_trait]
pub trait MediaSource: Send {
    async fn start(&mut self) -> Result<()>;

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// The source's cancellation scope, cancelled when it shuts down.
    fn cancel_token(&self) -> &CancellationToken;

    fn close(&self) {
        self.cancel_token().cancel();
    }
}

/// Copy from the pending chunk into `buf`, clearing it once exhausted.
///
/// Returns `None` when no pending bytes remain (absent or empty chunk), in
/// which case the caller awaits the next chunk. This is the shared advance
/// step of the chunk-cursor read loops in the source implementations.
pub(crate) fn take_from_chunk(current: &mut Option<Bytes>, buf: &mut [u8]) -> Option<usize> {
    let chunk = current.as_mut()?;
    if chunk.is_empty() {
        *current = None;
        return None;
    }
    let n = chunk.len().min(buf.len());
    buf[..n].copy_from_slice(&chunk[..n]);
    chunk.advance(n);
    if chunk.is_empty() {
        *current = None;
    }
    Some(n)
}
