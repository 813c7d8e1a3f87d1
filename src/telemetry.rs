//! Tracing subscriber setup for the binary.

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins over the configured level when set. Calling this twice is
/// harmless: the second call reports `false`.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("fairplay={}", config.level))),
        )
        .with_ansi(config.ansi)
        .with_target(false)
        .try_init()
        .is_ok()
}
