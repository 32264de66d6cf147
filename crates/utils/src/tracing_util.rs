//! Minimal `tracing` wiring shared by binaries built on top of this crate.

use tracing_subscriber::EnvFilter;

/// Install a `tracing_subscriber` global subscriber driven by `RUST_LOG`
/// (or `info` if unset). Safe to call more than once; only the first call
/// takes effect.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
