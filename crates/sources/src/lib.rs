// SPDX-FileCopyrightText: © 2025 Tunercast Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Tunercast Sources - upstream producers behind the [`MediaSource`] contract.
//!
//! Each source turns one upstream origin into a cancellable byte reader:
//!
//! - [`HttpSource`]: a long-lived progressive HTTP GET
//! - [`HlsSource`]: an HLS media playlist driven by a background pull loop
//!   with parallel segment downloads and ordered reassembly
//! - [`TranscoderSource`]: an external transcoder child emitting fragmented
//!   MP4 on stdout
//! - [`LiveRoomResolver`]: resolves live-room ids to HLS playlist URLs for
//!   the dynamic upstream kind
//!
//! All network fetches go through the process-wide [`client::http_client`].

pub mod bilibili;
pub mod client;
pub mod hls;
pub mod http;
pub mod playlist;
pub mod source;
pub mod transcoder;

#[cfg(test)]
pub(crate) mod test_util;

pub use bilibili::LiveRoomResolver;
pub use client::http_client;
pub use hls::HlsSource;
pub use http::HttpSource;
pub use source::MediaSource;
pub use transcoder::TranscoderSource;
