// SPDX-FileCopyrightText: © 2025 Tunercast Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Process-wide HTTP client shared by all upstream fetches.

use std::sync::OnceLock;
use std::time::Duration;

use tunercast_core::{Result, StreamError};

/// The shared `reqwest` client. Built once; connection pooling makes reuse
/// across playlist polls and segment fetches significant for HLS cadence.
/// Redirects stay enabled, since progressive upstreams commonly bounce
/// through CDN redirectors.
pub fn http_client() -> Result<&'static reqwest::Client> {
    static CLIENT: OnceLock<reqwest::Result<reqwest::Client>> = OnceLock::new();
    CLIENT
        .get_or_init(|| {
            reqwest::Client::builder().connect_timeout(Duration::from_secs(5)).build()
        })
        .as_ref()
        .map_err(|e| StreamError::Upstream(format!("failed to initialize HTTP client: {e}")))
}
