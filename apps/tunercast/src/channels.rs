// SPDX-FileCopyrightText: © 2025 Tunercast Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Channel lineup model and loader.
//!
//! The lineup is a JSON array of channels loaded from a local path or an
//! HTTP(S) URL. It is re-read on every request that needs it, so edits to the
//! list take effect without a restart.

use serde::{Deserialize, Serialize};

use tunercast_sources::http_client;

/// Upstream kind of one channel. Unknown strings survive deserialization and
/// only fail when a viewer actually tunes the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Progressive HTTP stream proxied as-is.
    Proxy,
    /// HLS media playlist pulled and reassembled.
    Hls,
    /// RTSP upstream remuxed through the external transcoder.
    Rtsp,
    /// Live-room id whose HLS URL is resolved on demand.
    Bilibili,
    /// Plain HTTP redirect to the upstream URL.
    Redirect,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    /// Upstream URL, or the room id for resolved channels.
    #[serde(default)]
    pub url: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    #[serde(default)]
    pub icon: String,
}

/// Load the channel list from a local path or HTTP(S) URL.
pub async fn load_channels(source: &str) -> anyhow::Result<Vec<Channel>> {
    let source = source.trim();
    if source.is_empty() {
        anyhow::bail!("channel source not configured");
    }
    let data = if source.starts_with("http://") || source.starts_with("https://") {
        let response = http_client()?.get(source).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("channel source {source} returned status {}", response.status());
        }
        response.bytes().await?.to_vec()
    } else {
        tokio::fs::read(source).await?
    };
    let channels = serde_json::from_slice(&data)?;
    Ok(channels)
}
