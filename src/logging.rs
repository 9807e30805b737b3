//! Tracing subscriber setup.
//!
//! The library itself only emits `tracing` events; installing a
//! subscriber is the host's business. This helper exists for binaries and
//! tests that want the conventional env-filtered fmt subscriber with one
//! call.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install an env-filtered fmt subscriber once. Respects `RUST_LOG`;
/// defaults to `info`. Safe to call from every test.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
