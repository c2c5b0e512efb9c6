// SPDX-FileCopyrightText: © 2025 Tunercast Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Shared helpers for source tests.

use std::net::SocketAddr;

use axum::Router;

/// Bind a throwaway in-process upstream on an ephemeral port.
///
/// Returns `None` when the sandbox forbids local TCP binds, in which case the
/// calling test should skip itself.
pub(crate) async fn serve_mock(router: Router) -> Option<SocketAddr> {
    let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => return None,
        Err(e) => panic!("failed to bind mock upstream: {e}"),
    };
    let addr = listener.local_addr().expect("mock listener has a local address");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "mock upstream exited");
        }
    });
    Some(addr)
}
