//! Logging setup for hosts that do not install their own subscriber.

use crate::config::LoggingConfig;
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over the configured level. Returns an error when a
/// subscriber is already installed or the configured filter does not parse.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    build_subscriber(config)?
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}

/// Subscriber described by `config`, not yet installed
fn build_subscriber(
    config: &LoggingConfig,
) -> anyhow::Result<impl Subscriber + Send + Sync + 'static> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            anyhow::anyhow!("invalid logging.level '{}': {}", config.level, e)
        })?,
    };

    let (json, text) = if config.json {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true),
            ),
            None,
        )
    } else {
        (None, Some(tracing_subscriber::fmt::layer().with_target(true)))
    };

    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    fn config(level: &str, json: bool) -> LoggingConfig {
        LoggingConfig {
            level: level.into(),
            json,
        }
    }

    #[test]
    fn test_configured_level_filters_events() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        for json in [true, false] {
            let subscriber = build_subscriber(&config("warn", json)).unwrap();
            tracing::subscriber::with_default(subscriber, || {
                assert!(tracing::enabled!(Level::WARN));
                assert!(!tracing::enabled!(Level::INFO));
            });
        }
    }

    #[test]
    fn test_rejects_invalid_level() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert!(build_subscriber(&config("orders=loud", false)).is_err());
    }

    #[test]
    fn test_second_init_fails() {
        // The only test in this binary that installs the global subscriber
        let config = config("info", true);
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_err());
    }
}
