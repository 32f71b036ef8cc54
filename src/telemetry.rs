//! Tracing setup for the coordination engine.
//!
//! The engine logs through `tracing` macros at component boundaries.
//! Hosts embedding the library can install their own subscriber instead;
//! `init` is idempotent and loses the race silently if one is already set.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Install a formatted subscriber filtered by `COLONY_LOG` (default `info`).
pub fn init() {
    init_with_filter("info");
}

/// Install a formatted subscriber with an explicit default filter directive.
///
/// The `COLONY_LOG` environment variable overrides `default_filter`.
pub fn init_with_filter(default_filter: &str) {
    INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_env("COLONY_LOG")
            .unwrap_or_else(|_| EnvFilter::new(default_filter));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}
