//! Tracing subscriber setup.
//!
//! The engine and the log channel emit through `tracing`; this module wires
//! up a subscriber for binaries and tests that want console output. Filtering
//! follows `RUST_LOG` when set, with a sensible default otherwise.
//!
//! # Example
//! ```no_run
//! benchrun::telemetry::init();
//! tracing::info!("engine ready");
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize a pretty console subscriber with the default `info` floor.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    init_with("info");
}

/// Initialize with an explicit filter directive (e.g. `"benchrun=debug"`),
/// still overridable through `RUST_LOG`.
pub fn init_with(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_names(true))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init();
        init_with("debug");
        tracing::debug!("still alive");
    }
}
