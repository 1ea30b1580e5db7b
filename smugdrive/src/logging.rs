use std::ffi::OsStr;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_FILTER: &str = "info";

/// Installs the global subscriber: stderr always, plus a plain-text file when
/// `SMUGDRIVE_LOG_FILE` is set. Keep the returned guard alive until exit so
/// buffered file output is flushed.
pub fn init() -> Option<WorkerGuard> {
    let filter = filter_from(std::env::var("SMUGDRIVE_LOG").ok().as_deref());

    let (file_layer, guard) = match std::env::var("SMUGDRIVE_LOG_FILE") {
        Ok(path) if !path.trim().is_empty() => {
            let path = Path::new(&path);
            let dir = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path.file_name().unwrap_or_else(|| OsStr::new("smugdrive.log"));
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

fn filter_from(directive: Option<&str>) -> EnvFilter {
    directive
        .filter(|value| !value.trim().is_empty())
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
