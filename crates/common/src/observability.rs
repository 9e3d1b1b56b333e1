//! Observability setup for courier
//!
//! Provides tracing/logging initialization shared by binaries, examples
//! and integration tests.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing/logging subsystem
///
/// The output format is selected via `COURIER_LOG_FORMAT` (`json` or
/// `pretty`, default `json`); the log level comes from the standard
/// `RUST_LOG` filter and defaults to `info`.
pub fn init_tracing() -> Result<()> {
    let format = std::env::var("COURIER_LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    // JSON format for structured logging in production
    let json_layer = if format == "json" {
        Some(
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
    } else {
        None
    };

    // Pretty format for development
    let pretty_layer = if format == "pretty" {
        Some(
            fmt::layer()
                .pretty()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
    } else {
        None
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .init();

    info!("Tracing initialized");
    Ok(())
}
