// SPDX-FileCopyrightText: © 2025 Tunercast Contributors
//
// SPDX-License-Identifier: MPL-2.0

use tokio_util::sync::CancellationToken;

use crate::broadcast::BroadcastRegistry;
use crate::config::Config;
use tunercast_sources::LiveRoomResolver;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: BroadcastRegistry,
    pub resolver: LiveRoomResolver,
    /// Root cancellation scope; cancelled on shutdown signals.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: BroadcastRegistry::new(),
            resolver: LiveRoomResolver::new(),
            shutdown: CancellationToken::new(),
        }
    }
}
