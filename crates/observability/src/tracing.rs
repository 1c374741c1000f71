//! Tracing/logging initialization.
//!
//! Structured JSON lines on stdout, filtered via `RUST_LOG`. Domain events
//! emitted through the `surgecart::events` target ride the same pipeline.

use tracing_subscriber::EnvFilter;

/// Initialize tracing for the process, with `default_filter` applied when
/// `RUST_LOG` is unset.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_current_span(false)
        .try_init();
}
