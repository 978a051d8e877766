//! Structured logging setup for the CLI.

use std::env;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Env var holding the log filter, e.g. `debug` or `unified_plays=trace`.
pub const LOG_ENV: &str = "UNIFIED_PLAYS_LOG";

/// Logs go to stderr so stdout stays free for the summary and reports.
pub fn init_logging() {
    let filter = env::var(LOG_ENV).unwrap_or_else(|_| "info".to_string());
    let filter_layer = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(false),
        )
        .with(filter_layer)
        .try_init();
}
