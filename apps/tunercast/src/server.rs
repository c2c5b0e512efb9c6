// SPDX-FileCopyrightText: © 2025 Tunercast Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! HTTP surface: HDHomeRun-compatible discovery/lineup endpoints, the UPnP
//! device descriptor, and the stream entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::channels::load_channels;
use crate::config::Config;
use crate::state::AppState;
use crate::stream;

/// Build the router and its shared state.
pub fn create_app(config: Config) -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(config));
    let router = Router::new()
        .route("/discover.json", get(discover))
        .route("/lineup_status.json", get(lineup_status))
        .route("/lineup.json", get(lineup))
        .route("/stream/{id}", get(stream::stream_channel))
        .route("/", get(device_description))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(SetResponseHeaderLayer::overriding(
                    header::CACHE_CONTROL,
                    HeaderValue::from_static("no-store"),
                ))
                .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)),
        )
        .with_state(Arc::clone(&state));
    (router, state)
}

/// Base URL as the client addressed us; the tuner protocol is plain HTTP.
fn base_url(headers: &HeaderMap) -> String {
    let host =
        headers.get(header::HOST).and_then(|value| value.to_str().ok()).unwrap_or("localhost");
    format!("http://{host}")
}

async fn discover(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Json<serde_json::Value> {
    let base_url = base_url(&headers);
    Json(json!({
        "FriendlyName": "tunercast",
        "Manufacturer": "tunercast",
        "ModelNumber": "tunercast",
        "FirmwareName": "tunercast",
        "TunerCount": state.config.tuner_count,
        "FirmwareVersion": env!("CARGO_PKG_VERSION"),
        "DeviceID": state.config.id,
        "DeviceAuth": "tunercast",
        "BaseURL": base_url,
        "LineupURL": format!("{base_url}/lineup.json"),
    }))
}

async fn lineup_status() -> Json<serde_json::Value> {
    Json(json!({
        "ScanInProgress": 0,
        "ScanPossible": 1,
        "Source": "Cable",
        "SourceList": ["Cable"],
    }))
}

async fn lineup(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let channels = match load_channels(&state.config.channel).await {
        Ok(channels) => channels,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };
    let base_url = base_url(&headers);
    let lineup: Vec<serde_json::Value> = channels
        .iter()
        .map(|channel| {
            json!({
                "GuideNumber": channel.id,
                "GuideName": channel.name,
                "URL": format!("{base_url}/stream/{}", channel.id),
            })
        })
        .collect();
    Json(lineup).into_response()
}

fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// UPnP device descriptor served at `/`.
async fn device_description(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let descriptor = format!(
        r#"<root xmlns="urn:schemas-upnp-org:device-1-0">
    <specVersion>
        <major>1</major>
        <minor>0</minor>
    </specVersion>
    <URLBase>{base}</URLBase>
    <device>
        <deviceType>urn:schemas-upnp-org:device:MediaServer:1</deviceType>
        <friendlyName>tunercast</friendlyName>
        <manufacturer>tunercast</manufacturer>
        <modelName>tunercast</modelName>
        <modelNumber>tunercast</modelNumber>
        <serialNumber></serialNumber>
        <UDN>uuid:{udn}</UDN>
    </device>
</root>"#,
        base = escape_xml(&base_url(&headers)),
        udn = escape_xml(&state.config.id),
    );
    (
        [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
        descriptor,
    )
        .into_response()
}

/// Resolves when any of the termination signals (interrupt, terminate,
/// hangup, quit) arrives.
///
/// # Panics
///
/// Panics if a signal handler cannot be installed (critical OS failure).
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(unix)]
    let hangup = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            .expect("failed to install SIGHUP handler")
            .recv()
            .await;
    };
    #[cfg(unix)]
    let quit = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::quit())
            .expect("failed to install SIGQUIT handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    #[cfg(not(unix))]
    let hangup = std::future::pending::<()>();
    #[cfg(not(unix))]
    let quit = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received interrupt, initiating graceful shutdown"),
        () = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
        () = hangup => info!("Received SIGHUP, initiating graceful shutdown"),
        () = quit => info!("Received SIGQUIT, initiating graceful shutdown"),
    }
}

/// Bind and serve until a termination signal cancels the root scope.
///
/// # Errors
///
/// Returns an error when the listen address does not parse or the listener
/// cannot bind.
pub async fn start_server(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let (app, state) = create_app(config.clone());
    let addr: SocketAddr = config.listen.parse()?;

    let handle = axum_server::Handle::new();
    tokio::spawn({
        let handle = handle.clone();
        let state = Arc::clone(&state);
        async move {
            shutdown_signal().await;
            // Root scope cancels first so in-flight streams end, then the
            // accept loop drains within its bound.
            state.shutdown.cancel();
            state.registry.shutdown().await;
            handle.graceful_shutdown(Some(Duration::from_secs(10)));
        }
    });

    info!(address = %addr, "Starting tuner HTTP server");
    axum_server::bind(addr).handle(handle).serve(app.into_make_service()).await.map_err(|e| {
        error!(error = %e, "server error");
        e.into()
    })
}
