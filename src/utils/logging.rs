//! Structured logging initialization.

use crate::config::LoggingConfig;
use crate::error::{RelayError, Result};

/// Install the global tracing subscriber from the logging configuration.
///
/// Fails if a subscriber is already installed, which keeps repeated
/// initialization an explicit error rather than a silent override.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt().with_max_level(config.log_level);

    let result = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| RelayError::ConfigError(format!("Failed to initialize logging: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_an_explicit_error() {
        let config = LoggingConfig::default();
        let first = init(&config);
        let second = init(&config);

        // whichever call installed the subscriber, the repeat must fail loudly
        assert!(first.is_ok() || matches!(first, Err(RelayError::ConfigError(_))));
        assert!(matches!(second, Err(RelayError::ConfigError(_))));
    }
}
