//! Structured logging setup. This crate does not own log *formatting* for
//! the surrounding service — that belongs to whatever binary embeds it —
//! but it is responsible for emitting well-structured `tracing` events
//! around every provisioning attempt, sweep, and reconciliation tick.

use tracing_subscriber::EnvFilter;

/// Install a process-global `tracing` subscriber driven by `RUST_LOG`
/// (defaulting to `info` for this crate if unset). Safe to call once at
/// process startup; a second call is a no-op rather than a panic.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
