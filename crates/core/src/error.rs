// SPDX-FileCopyrightText: © 2025 Tunercast Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Structured error types for tunercast stream plumbing.
//!
//! Every byte endpoint in the workspace (chunk buffers, fan-out pipes,
//! upstream sources) fails with a [`StreamError`]. The two closed-endpoint
//! variants are ordinary end-of-life signals for live streams and are treated
//! as end-of-stream by copy loops; the remaining variants describe upstream
//! or format failures that tear the enclosing scope down.

use thiserror::Error;

/// Error type for all stream primitives and upstream sources.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Read attempted on an endpoint whose scope was cancelled or closed.
    #[error("read on closed stream")]
    ReadClosed,

    /// Write attempted on an endpoint whose scope was cancelled or closed.
    #[error("write on closed stream")]
    WriteClosed,

    /// A chunk fill addressed a slot outside the buffer.
    #[error("chunk index {index} out of bounds for {len} slots")]
    ChunkIndexOutOfBounds { index: usize, len: usize },

    /// An upstream fetch failed permanently (after bounded retries).
    #[error("upstream error: {0}")]
    Upstream(String),

    /// A playlist was malformed or of the wrong type.
    #[error("playlist error: {0}")]
    Playlist(String),

    /// The live-room resolver could not produce a stream URL.
    #[error("resolver error: {0}")]
    Resolver(String),

    /// I/O error (pipes, child processes).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// True for the closed-endpoint variants, which copy loops treat as
    /// end-of-stream rather than failures.
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::ReadClosed | Self::WriteClosed)
    }
}

/// Convenience type alias for Results using [`StreamError`].
pub type Result<T> = std::result::Result<T, StreamError>;
