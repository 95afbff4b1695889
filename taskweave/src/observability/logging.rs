//! Subscriber installation.

use crate::config::LogConfig;
use crate::errors::ConfigError;
use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber for `config`.
///
/// The `RUST_LOG` environment variable, when set, wins over
/// `config.level`. Returns `Ok(false)` if a subscriber was already installed,
/// so calling this more than once is harmless.
pub fn init_logging(config: &LogConfig) -> Result<bool, ConfigError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| ConfigError::Logging(e.to_string()))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = if config.json {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.try_init()
    };

    match installed {
        Ok(()) => {
            tracing::debug!(level = %config.level, json = config.json, "Logging initialised");
            Ok(true)
        }
        Err(err) => {
            tracing::debug!(error = %err, "Logging already initialised");
            Ok(false)
        }
    }
}
