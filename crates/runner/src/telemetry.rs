//! Tracing setup

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fixturekit_common::RunnerConfig;

/// Install a fmt subscriber. `RUST_LOG` wins over `default_filter`.
/// Returns false if a global subscriber was already installed.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init()
        .is_ok()
}

/// Install a subscriber using the filter of a run configuration
pub fn init_tracing_for(config: &RunnerConfig) -> bool {
    init_tracing(&config.log_filter)
}
