//! Tracing setup for embedders

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;
use crate::error::{Error, Result};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides `config.level`. Fails if a subscriber is already
/// installed.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::Config(format!("invalid log level '{}': {}", config.level, e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(config.json.then(|| fmt::layer().json()))
        .with((!config.json).then(|| fmt::layer()))
        .try_init()
        .map_err(|e| Error::Config(format!("tracing already initialized: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        let config = LogConfig::default();
        // Another test may have installed a subscriber first
        let _ = init_tracing(&config);
        assert!(matches!(init_tracing(&config), Err(Error::Config(_))));
    }
}
