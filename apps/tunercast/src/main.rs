// SPDX-FileCopyrightText: © 2025 Tunercast Contributors
//
// SPDX-License-Identifier: MPL-2.0

use clap::Parser;

use tunercast_server::cli;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();
    cli::handle_serve(&cli).await;
}
