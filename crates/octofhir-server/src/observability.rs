//! Structured logging startup (§4 ambient stack: logging). A single
//! `tracing-subscriber` registry with a reloadable `EnvFilter`, so the
//! configured `logging.level` can be swapped without bouncing the process.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> = OnceLock::new();

pub fn init_tracing() {
    init_tracing_with_level("info");
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over
/// `level` when set, matching every other `tracing`-based service in this
/// stack.
pub fn init_tracing_with_level(level: &str) {
    let base_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let _ = tracing_subscriber::registry().with(reload_layer).with(fmt::layer()).try_init();
}

/// Swaps the active filter at runtime, if a subscriber was installed via
/// [`init_tracing`]/[`init_tracing_with_level`].
pub fn apply_logging_level(level: &str) {
    if let Some(handle) = LOG_RELOAD_HANDLE.get() {
        let _ = handle.modify(|f| *f = EnvFilter::new(level));
    }
}

pub fn shutdown_tracing() {
    // No background exporter to flush; reserved for parity with services
    // that do carry one.
}
