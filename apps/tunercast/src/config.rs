// SPDX-FileCopyrightText: © 2025 Tunercast Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Server configuration.
//!
//! A JSON config file layered under a `TUNERCAST_`-prefixed environment
//! overlay. The device id is the only required field; everything else has a
//! workable default.

use figment::providers::{Env, Format, Json};
use figment::Figment;
use serde::{Deserialize, Serialize};

const fn default_tuner_count() -> u32 {
    1
}

fn default_listen() -> String {
    "0.0.0.0:5004".to_string()
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Unique device id reported to the media-server host.
    #[serde(default)]
    pub id: String,
    /// Advertised tuner count (minimum 1).
    #[serde(default = "default_tuner_count")]
    pub tuner_count: u32,
    /// Listen address, e.g. `0.0.0.0:5004`.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Path to the transcoder binary used by rtsp channels.
    #[serde(default)]
    pub ffmpeg: String,
    /// Channel list location: a local path or an HTTP(S) URL.
    #[serde(default)]
    pub channel: String,
    /// Log file path; empty keeps logging on the console only.
    #[serde(default)]
    pub log: String,
}

/// Load and normalize the configuration.
///
/// # Errors
///
/// Fails when the file is missing or unreadable, when a field does not
/// deserialize, or when the device id is blank.
pub fn load(path: &str) -> anyhow::Result<Config> {
    if !std::path::Path::new(path).is_file() {
        anyhow::bail!("config file not found: {path}");
    }
    let mut config: Config = Figment::new()
        .merge(Json::file(path))
        .merge(Env::prefixed("TUNERCAST_"))
        .extract()?;
    normalize(&mut config)?;
    Ok(config)
}

fn normalize(config: &mut Config) -> anyhow::Result<()> {
    config.id = config.id.trim().to_string();
    if config.id.is_empty() {
        anyhow::bail!("id missing in config file");
    }
    if config.tuner_count < 1 {
        config.tuner_count = 1;
    }
    config.listen = config.listen.trim().to_string();
    config.ffmpeg = config.ffmpeg.trim().to_string();
    config.channel = config.channel.trim().to_string();
    config.log = config.log.trim().to_string();
    Ok(())
}
