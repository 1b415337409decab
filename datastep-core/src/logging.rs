//! Tracing subscriber setup.
//!
//! The library only emits `tracing` events. Binaries call [`init_tracing`]
//! once at startup; embedders may install their own subscriber instead.

use crate::config::LoggingConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Filter directive for a `-v` count, or `quiet`, falling back to `default`.
pub fn filter_for_verbosity(verbose: u8, quiet: bool, default: &str) -> String {
    match verbose {
        0 if quiet => "error".to_string(),
        0 => default.to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Install a stderr subscriber filtered by `config.level`.
///
/// Returns false when a global subscriber was already installed.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = || EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let plain_layer = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(filter())
    });
    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter())
    });

    tracing_subscriber::registry()
        .with(plain_layer)
        .with(json_layer)
        .try_init()
        .is_ok()
}
