// SPDX-FileCopyrightText: © 2025 Tunercast Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Broadcast registry: one upstream ingestion per channel, shared by all of
//! its concurrent viewers.
//!
//! The first viewer of a key constructs and starts the source, creates the
//! fan-out pipe, and spawns the pump task that copies source bytes into the
//! pipe. Later viewers just attach a reader. When the last viewer releases,
//! the entry is removed and pipe and source close together.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

use tunercast_core::{FanoutPipe, FanoutReader, Result};
use tunercast_sources::{HlsSource, HttpSource, MediaSource};

/// Copy granularity of the pump task.
const PUMP_CHUNK: usize = 32 * 1024;

/// A shareable upstream, and how the registry keys it.
#[derive(Debug, Clone)]
pub enum SourceSpec {
    Progressive { url: String },
    Hls { playlist: Url },
}

impl SourceSpec {
    pub fn key(&self) -> String {
        match self {
            Self::Progressive { url } => format!("proxy:{url}"),
            Self::Hls { playlist } => format!("hls:{playlist}"),
        }
    }

    fn build(&self) -> Box<dyn MediaSource> {
        match self {
            Self::Progressive { url } => Box::new(HttpSource::new(url.clone())),
            Self::Hls { playlist } => Box::new(HlsSource::new(playlist.clone())),
        }
    }
}

struct BroadcastEntry {
    pipe: FanoutPipe,
    /// Close handle for the source owned by the pump task.
    source_token: CancellationToken,
    viewers: usize,
}

/// Keyed table of live broadcasts. Clones share the same table.
#[derive(Clone, Default)]
pub struct BroadcastRegistry {
    entries: Arc<Mutex<HashMap<String, BroadcastEntry>>>,
}

impl BroadcastRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the broadcast for `spec`, creating it if this is the first
    /// viewer. On a fresh broadcast the source `start` runs under the
    /// registry lock: the work is bounded, and a two-phase scheme would
    /// admit racy double-creation of the same upstream.
    pub async fn acquire(&self, spec: &SourceSpec) -> Result<SharedReader> {
        let key = spec.key();
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get_mut(&key) {
            entry.viewers += 1;
            tracing::debug!(key = %key, viewers = entry.viewers, "viewer joined broadcast");
            return Ok(SharedReader {
                reader: entry.pipe.attach(),
                registry: self.clone(),
                key,
                released: false,
            });
        }

        let mut source = spec.build();
        source.start().await?;
        let source_token = source.cancel_token().clone();
        let pipe = FanoutPipe::new();
        tokio::spawn(pump(source, pipe.clone(), key.clone()));

        let reader = pipe.attach();
        entries.insert(key.clone(), BroadcastEntry { pipe, source_token, viewers: 1 });
        tracing::info!(key = %key, "broadcast started");
        Ok(SharedReader { reader, registry: self.clone(), key, released: false })
    }

    async fn release(&self, key: &str) {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        entry.viewers = entry.viewers.saturating_sub(1);
        if entry.viewers == 0 {
            if let Some(entry) = entries.remove(key) {
                entry.pipe.close();
                entry.source_token.cancel();
                tracing::info!(key = %key, "broadcast torn down");
            }
        }
    }

    /// Number of live broadcasts.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.lock().await.contains_key(key)
    }

    /// Tear down every live broadcast. Used on root-scope cancellation; the
    /// cascade reaches pumps, sources, windows, and viewer readers.
    pub async fn shutdown(&self) {
        let mut entries = self.entries.lock().await;
        for (key, entry) in entries.drain() {
            entry.pipe.close();
            entry.source_token.cancel();
            tracing::debug!(key = %key, "broadcast closed on shutdown");
        }
    }
}

/// Sole writer of the broadcast's pipe: copies source bytes until either side
/// ends, then closes both. A closed-read/closed-write is the normal
/// tear-down path, not a failure.
async fn pump(mut source: Box<dyn MediaSource>, pipe: FanoutPipe, key: String) {
    let mut buf = vec![0u8; PUMP_CHUNK];
    loop {
        match source.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!(key = %key, "upstream ended");
                break;
            }
            Ok(n) => {
                if pipe.write(&buf[..n]).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                if !e.is_closed() {
                    tracing::warn!(key = %key, error = %e, "upstream read failed");
                }
                break;
            }
        }
    }
    pipe.close();
    source.close();
}

/// One viewer's handle on a shared broadcast: a fan-out reader plus the
/// release bookkeeping for the registry entry.
pub struct SharedReader {
    reader: FanoutReader,
    registry: BroadcastRegistry,
    key: String,
    released: bool,
}

impl SharedReader {
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.reader.read(buf).await
    }

    /// Close the reader and drop this viewer's reference, tearing the
    /// broadcast down when it was the last one.
    pub async fn release(mut self) {
        self.released = true;
        self.reader.close();
        let registry = self.registry.clone();
        let key = self.key.clone();
        registry.release(&key).await;
    }
}

impl Drop for SharedReader {
    fn drop(&mut self) {
        self.reader.close();
        if !self.released {
            // Backstop for handles dropped without an explicit release.
            let registry = self.registry.clone();
            let key = std::mem::take(&mut self.key);
            tokio::spawn(async move {
                registry.release(&key).await;
            });
        }
    }
}
