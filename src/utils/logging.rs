//! Logging initialization for the engine.
//!
//! Thin setup over `tracing-subscriber`, driven by
//! [`LoggingConfig`](crate::config::LoggingConfig). The environment variable
//! `RUST_LOG` always wins over the configured level so operators can turn up
//! verbosity without editing config files.

use std::fs::File;
use std::sync::Arc;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::error::{LinkError, Result};

/// Initialize logging with default settings (console, `info` level).
pub fn init() -> Result<()> {
    init_with_config(&LoggingConfig::default())
}

/// Initialize the logging system from a [`LoggingConfig`].
///
/// Fails if a file sink is requested but cannot be opened, or if a
/// subscriber was already installed.
pub fn init_with_config(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string().to_lowercase()));

    let console_layer = if config.log_to_console {
        let layer = fmt::layer().with_target(true);
        if config.json_format {
            Some(layer.json().boxed())
        } else {
            Some(layer.boxed())
        }
    } else {
        None
    };

    let file_layer = match (&config.log_file_path, config.log_to_file) {
        (Some(path), true) => {
            let file = File::create(path).map_err(|e| {
                LinkError::ConfigError(format!("failed to open log file {path}: {e}"))
            })?;
            Some(fmt::layer().with_ansi(false).with_writer(Arc::new(file)).boxed())
        }
        _ => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LinkError::ConfigError(format!("failed to initialize logging: {e}")))?;

    Ok(())
}
