//! Metric names recorded by the runtime.
//!
//! Recording is a no-op until a recorder is installed (the server installs
//! a Prometheus recorder at startup).

/// Inbound messages dispatched (counter).
pub const DISPATCH_MESSAGES_TOTAL: &str = "dispatch_messages_total";
/// Dispatch failures (counter, labels: kind).
pub const DISPATCH_ERRORS_TOTAL: &str = "dispatch_errors_total";
/// Per-message dispatch duration seconds (histogram).
pub const DISPATCH_DURATION_SECONDS: &str = "dispatch_duration_seconds";
/// Contained middleware failures (counter, labels: middleware).
pub const MIDDLEWARE_ERRORS_TOTAL: &str = "middleware_errors_total";
/// Per-recipient broadcast send failures (counter).
pub const BROADCAST_SEND_FAILURES_TOTAL: &str = "broadcast_send_failures_total";
