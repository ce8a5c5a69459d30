//! Process-wide tracing setup shared by the StreamLab binaries.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    subscriber::init();
}

/// Subscriber configuration (filters, output format).
pub mod subscriber;
