// SPDX-FileCopyrightText: © 2025 Tunercast Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Bilibili live-room resolver.
//!
//! Resolves a live-room id into a playable HLS playlist URL via the
//! room-play-info API, preferring fragmented-MP4 HLS and falling back to TS
//! HLS when the room does not offer it.

use serde::Deserialize;
use url::Url;

use tunercast_core::{Result, StreamError};

use crate::client::http_client;

const ROOM_PLAY_INFO_API: &str =
    "https://api.live.bilibili.com/xlive/web-room/v2/index/getRoomPlayInfo";

const PROTOCOL_HLS: &str = "http_hls";

#[derive(Debug, Deserialize)]
struct PlayInfoResponse {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<PlayInfoData>,
}

#[derive(Debug, Deserialize)]
struct PlayInfoData {
    playurl_info: Option<PlayUrlInfo>,
}

#[derive(Debug, Deserialize)]
struct PlayUrlInfo {
    playurl: Option<PlayUrl>,
}

#[derive(Debug, Deserialize)]
struct PlayUrl {
    #[serde(default)]
    stream: Vec<StreamEntry>,
}

#[derive(Debug, Deserialize)]
struct StreamEntry {
    #[serde(default)]
    protocol_name: String,
    #[serde(default)]
    format: Vec<FormatEntry>,
}

#[derive(Debug, Deserialize)]
struct FormatEntry {
    #[serde(default)]
    codec: Vec<CodecEntry>,
}

#[derive(Debug, Deserialize)]
struct CodecEntry {
    #[serde(default)]
    base_url: String,
    #[serde(default)]
    url_info: Vec<UrlInfo>,
}

#[derive(Debug, Deserialize)]
struct UrlInfo {
    #[serde(default)]
    host: String,
    #[serde(default)]
    extra: String,
}

/// Resolver for live-room upstream URLs.
#[derive(Debug, Clone)]
pub struct LiveRoomResolver {
    api_base: String,
}

impl Default for LiveRoomResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveRoomResolver {
    pub fn new() -> Self {
        Self { api_base: ROOM_PLAY_INFO_API.to_string() }
    }

    /// Point the resolver at a different API endpoint. Used by tests.
    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self { api_base: api_base.into() }
    }

    /// Resolve a room id to an HLS playlist URL, preferring fMP4.
    pub async fn resolve_hls(&self, room_id: &str) -> Result<Url> {
        match self.playlist_url(room_id, "fmp4").await {
            Ok(url) => Ok(url),
            Err(fmp4_err) => {
                tracing::debug!(room_id, error = %fmp4_err, "no fmp4 stream, trying ts");
                self.playlist_url(room_id, "ts").await
            }
        }
    }

    async fn playlist_url(&self, room_id: &str, format: &str) -> Result<Url> {
        // format=0,2 selects fmp4 containers, format=0,1 ts containers.
        let format_query = if format == "fmp4" { "0,2" } else { "0,1" };
        let api = format!(
            "{}?room_id={room_id}&codec=0,1&protocol=0,1&format={format_query}",
            self.api_base
        );

        let response = http_client()?
            .get(&api)
            .send()
            .await
            .map_err(|e| StreamError::Resolver(format!("room-play-info request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(StreamError::Resolver(format!(
                "room-play-info returned status {}",
                response.status()
            )));
        }
        let payload: PlayInfoResponse = response
            .json()
            .await
            .map_err(|e| StreamError::Resolver(format!("room-play-info decode failed: {e}")))?;

        if payload.code != 0 {
            let message = if payload.message.is_empty() {
                format!("api code {}", payload.code)
            } else {
                payload.message
            };
            return Err(StreamError::Resolver(message));
        }

        let streams = payload
            .data
            .and_then(|data| data.playurl_info)
            .and_then(|info| info.playurl)
            .map(|playurl| playurl.stream)
            .unwrap_or_default();

        let codec = streams
            .into_iter()
            .find(|stream| stream.protocol_name == PROTOCOL_HLS)
            .and_then(|stream| stream.format.into_iter().next())
            .and_then(|format| format.codec.into_iter().next())
            .ok_or_else(|| StreamError::Resolver("no stream found".to_string()))?;
        let url_info = codec
            .url_info
            .first()
            .ok_or_else(|| StreamError::Resolver("no stream found".to_string()))?;

        let assembled = format!("{}{}{}", url_info.host, codec.base_url, url_info.extra);
        Url::parse(&assembled)
            .map_err(|e| StreamError::Resolver(format!("bad stream url {assembled}: {e}")))
    }
}
