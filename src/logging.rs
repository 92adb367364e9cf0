//! Logging setup.
//!
//! Diagnostics go to stderr through `tracing-subscriber`; stdout stays free
//! for command output. `RUST_LOG` takes precedence over `[logging].level`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::LoggingConfig;

/// Build the filter: `RUST_LOG` if set and valid, else the configured level
/// applied to this crate and `warn` for dependencies.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,volley_rag={},vrag={}", config.level, config.level))
    })
}

/// Install the global subscriber. A second call is a no-op, so tests and the
/// binary can both call it.
pub fn init(config: &LoggingConfig) {
    let console = fmt::layer().with_target(true).with_writer(std::io::stderr);

    let _ = Registry::default()
        .with(env_filter(config))
        .with(console)
        .try_init();
}
