//! Tracing/logging setup shared by the Frame 15 binaries.

/// Initialize process-wide tracing with the default filter (`info`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init("info");
}

/// Initialize process-wide tracing, falling back to `default_filter` when
/// `RUST_LOG` is unset.
pub fn init_with_filter(default_filter: &str) {
    tracing::init(default_filter);
}

/// Tracing configuration (filters, layers).
pub mod tracing;
