// SPDX-FileCopyrightText: © 2025 Tunercast Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Minimal HLS media-playlist parser.
//!
//! Covers exactly what the pull loop consumes: segment URIs with their
//! `EXTINF` durations, the `EXT-X-MEDIA-SEQUENCE` base, and an optional
//! `EXT-X-MAP` initialization resource. Master playlists and documents
//! without the `#EXTM3U` header are rejected as permanent format errors.

use std::time::Duration;

use tunercast_core::{Result, StreamError};

/// One media segment as listed in the playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaSegment {
    /// Absolute or playlist-relative URI.
    pub uri: String,
    pub duration: Duration,
    /// Media sequence id: `EXT-X-MEDIA-SEQUENCE` base plus list position.
    pub sequence: u64,
}

/// A parsed media playlist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaPlaylist {
    pub media_sequence: u64,
    /// URI of the `EXT-X-MAP` initialization resource, if declared.
    pub map_uri: Option<String>,
    pub segments: Vec<MediaSegment>,
}

/// Parse a media playlist document.
pub fn parse(input: &str) -> Result<MediaPlaylist> {
    let mut lines = input.lines().map(str::trim).filter(|line| !line.is_empty());

    if lines.next() != Some("#EXTM3U") {
        return Err(StreamError::Playlist("missing #EXTM3U header".to_string()));
    }

    let mut playlist = MediaPlaylist::default();
    let mut pending_duration: Option<Duration> = None;

    for line in lines {
        if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            playlist.media_sequence = value.trim().parse().map_err(|_| {
                StreamError::Playlist(format!("invalid media sequence: {value}"))
            })?;
        } else if let Some(attrs) = line.strip_prefix("#EXT-X-MAP:") {
            playlist.map_uri = attribute_value(attrs, "URI")
                .filter(|uri| !uri.is_empty())
                .map(str::to_string);
        } else if let Some(value) = line.strip_prefix("#EXTINF:") {
            let seconds = value
                .split(',')
                .next()
                .unwrap_or_default()
                .trim()
                .parse::<f64>()
                .map_err(|_| StreamError::Playlist(format!("invalid EXTINF: {value}")))?;
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(StreamError::Playlist(format!("invalid EXTINF: {value}")));
            }
            pending_duration = Some(Duration::from_secs_f64(seconds));
        } else if line.starts_with("#EXT-X-STREAM-INF") {
            return Err(StreamError::Playlist(
                "master playlist where a media playlist was expected".to_string(),
            ));
        } else if line.starts_with('#') {
            // Tag we do not consume (TARGETDURATION, DISCONTINUITY, ...).
        } else {
            let duration = pending_duration.take().ok_or_else(|| {
                StreamError::Playlist(format!("segment without EXTINF: {line}"))
            })?;
            let sequence = playlist.media_sequence + playlist.segments.len() as u64;
            playlist.segments.push(MediaSegment { uri: line.to_string(), duration, sequence });
        }
    }

    Ok(playlist)
}

/// Extract a (possibly quoted) attribute value from an attribute list like
/// `URI="init.mp4",BYTERANGE="720@0"`. Commas inside quotes do not split.
fn attribute_value<'a>(attrs: &'a str, key: &str) -> Option<&'a str> {
    let mut rest = attrs;
    while !rest.is_empty() {
        let (name, after_name) = rest.split_once('=')?;
        let name = name.trim();
        let (value, remainder) = if let Some(quoted) = after_name.strip_prefix('"') {
            let end = quoted.find('"')?;
            (&quoted[..end], quoted[end + 1..].trim_start_matches(','))
        } else {
            match after_name.split_once(',') {
                Some((value, remainder)) => (value, remainder),
                None => (after_name, ""),
            }
        };
        if name == key {
            return Some(value);
        }
        rest = remainder.trim_start();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_segments_with_sequence_base() {
        let playlist = parse(concat!(
            "#EXTM3U\n",
            "#EXT-X-VERSION:7\n",
            "#EXT-X-TARGETDURATION:4\n",
            "#EXT-X-MEDIA-SEQUENCE:10\n",
            "#EXTINF:4.0,\n",
            "seg10.m4s\n",
            "#EXTINF:3.5,\n",
            "seg11.m4s\n",
        ))
        .unwrap();

        assert_eq!(playlist.media_sequence, 10);
        assert_eq!(playlist.segments.len(), 2);
        assert_eq!(playlist.segments[0].sequence, 10);
        assert_eq!(playlist.segments[0].uri, "seg10.m4s");
        assert_eq!(playlist.segments[0].duration, Duration::from_secs(4));
        assert_eq!(playlist.segments[1].sequence, 11);
        assert_eq!(playlist.segments[1].duration, Duration::from_secs_f64(3.5));
    }

    #[test]
    fn test_parses_map_uri_with_quoted_commas() {
        let playlist = parse(concat!(
            "#EXTM3U\n",
            "#EXT-X-MAP:BYTERANGE=\"720@0\",URI=\"init,main.mp4\"\n",
            "#EXTINF:2,\n",
            "a.m4s\n",
        ))
        .unwrap();
        assert_eq!(playlist.map_uri.as_deref(), Some("init,main.mp4"));
    }

    #[test]
    fn test_rejects_master_playlist() {
        let err = parse(concat!(
            "#EXTM3U\n",
            "#EXT-X-STREAM-INF:BANDWIDTH=1280000\n",
            "low/playlist.m3u8\n",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("master playlist"));
    }

    #[test]
    fn test_rejects_missing_header() {
        assert!(matches!(parse("#EXTINF:2,\na.ts\n"), Err(StreamError::Playlist(_))));
    }

    #[test]
    fn test_rejects_segment_without_extinf() {
        let err = parse("#EXTM3U\norphan.ts\n").unwrap_err();
        assert!(err.to_string().contains("without EXTINF"));
    }

    #[test]
    fn test_empty_playlist_is_ok() {
        let playlist = parse("#EXTM3U\n#EXT-X-TARGETDURATION:4\n").unwrap();
        assert!(playlist.segments.is_empty());
        assert!(playlist.map_uri.is_none());
    }
}
