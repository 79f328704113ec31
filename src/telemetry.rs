//! Tracing subscriber bootstrap.
//!
//! The pipeline stages emit structured `tracing` events (stage progress at
//! debug level, recovered conditions at warn level). Library consumers who
//! already install their own subscriber can ignore this module; binaries
//! and tests can call [`init`] once at startup.

use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber: env-filtered fmt output on stderr plus
/// span-trace capture for error reports.
///
/// Respects `RUST_LOG`; defaults to `info` when unset. Returns an error if
/// a global subscriber is already installed.
pub fn try_init() -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(ErrorLayer::default())
        .try_init()
}

/// Like [`try_init`], but ignores an already-installed subscriber. Safe to
/// call from multiple tests.
pub fn init() {
    let _ = try_init();
}
