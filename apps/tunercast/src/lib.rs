// SPDX-FileCopyrightText: © 2025 Tunercast Contributors
//
// SPDX-License-Identifier: MPL-2.0

pub mod broadcast;
pub mod channels;
pub mod cli;
pub mod config;
pub mod logging;
pub mod server;
pub mod state;
pub mod stream;

// Re-export commonly used items for convenience
pub use config::Config;
pub use server::create_app;
pub use state::AppState;
