//! Tracing setup for the `remedy` binary.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub const LOG_FILE: &str = "remedy.log";

fn default_directive(verbose: bool) -> &'static str {
    if verbose { "remedy=debug" } else { "remedy=info" }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `verbose`. Compact output goes to stderr. When
/// `log_dir` is given, the same events are appended to `remedy.log` there
/// through a non-blocking writer; keep the returned guard alive until exit so
/// buffered lines are flushed.
pub fn init(log_dir: Option<&Path>, verbose: bool) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let stderr_layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match log_dir.filter(|d| std::fs::create_dir_all(d).is_ok()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // A second init (e.g. in tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    guard
}
