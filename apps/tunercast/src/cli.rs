// SPDX-FileCopyrightText: © 2025 Tunercast Contributors
//
// SPDX-License-Identifier: MPL-2.0

use clap::Parser;
use tracing::{error, info};

use crate::{config, logging, server};

#[derive(Parser, Debug)]
#[command(author, version, about = "Network TV tuner emulator", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.json")]
    pub config: String,
}

/// Load config, bring logging up, and serve until shutdown.
/// Exits the process with status 1 on config-load or listen failure.
// Allow eprintln before logging is initialized (CLI output)
#[allow(clippy::disallowed_macros)]
pub async fn handle_serve(cli: &Cli) {
    let config = match config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = match logging::init_logging(&config.log) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            std::process::exit(1);
        }
    };

    info!(
        address = %config.listen,
        tuner_count = config.tuner_count,
        channel_source = %config.channel,
        "Starting tunercast"
    );

    if let Err(e) = server::start_server(&config).await {
        error!(error = %e, "Failed to start server");
        std::process::exit(1);
    }
}
