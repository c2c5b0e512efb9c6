// SPDX-FileCopyrightText: © 2025 Tunercast Contributors
//
// SPDX-License-Identifier: MPL-2.0

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type DynLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize logging: a console layer always, plus a non-blocking file layer
/// when `log_path` is non-empty.
///
/// The returned guard must be kept alive for the lifetime of the process so
/// buffered file output is flushed on exit.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created.
pub fn init_logging(
    log_path: &str,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, Box<dyn std::error::Error>> {
    let mut layers: Vec<DynLayer> = Vec::new();
    let mut guard = None;

    if !log_path.is_empty() {
        let path = std::path::Path::new(log_path);
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("tunercast.log"));
        if let Err(e) = std::fs::create_dir_all(dir) {
            return Err(format!("failed to create log directory {}: {e}", dir.display()).into());
        }

        let appender = tracing_appender::rolling::never(dir, filename);
        let (non_blocking, file_guard) = tracing_appender::non_blocking(appender);
        guard = Some(file_guard);
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(env_filter())
                .boxed(),
        );
    }

    layers.push(tracing_subscriber::fmt::layer().with_filter(env_filter()).boxed());

    tracing_subscriber::registry().with(layers).init();
    Ok(guard)
}
