//! Process-wide tracing/logging setup.

pub mod tracing;

/// Initialize observability with the default filter.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init("info");
}
