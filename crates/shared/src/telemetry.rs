//! Tracing initialisation for binaries.

use tracing_subscriber::EnvFilter;

/// Initialise the global tracing subscriber. `RUST_LOG` wins over the
/// configured filter; calling this twice is harmless.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
