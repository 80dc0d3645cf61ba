//! Console logging setup for binaries and tests embedding the wallet core.
//!
//! The library itself only emits `tracing` events; nothing is printed unless a
//! subscriber is installed, either by the host application or through [`init_logging`].

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Error, Result};

/// Returned by [`init_logging`]; keep it alive for as long as logging is wanted.
#[derive(Debug)]
pub struct LoggingGuard {
    installed: bool,
}

impl LoggingGuard {
    /// Whether a subscriber was actually installed.
    pub fn is_installed(&self) -> bool {
        self.installed
    }
}

/// Configuration for logging output.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter. If None, `RUST_LOG` is consulted, then INFO.
    pub level: Option<LevelFilter>,
    /// Whether to output logs to the console (stderr).
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            console: true,
        }
    }
}

/// Initialize console-only logging with the given level.
pub fn init_console_logging(level: LevelFilter) -> Result<LoggingGuard> {
    init_logging(LoggingConfig {
        level: Some(level),
        console: true,
    })
}

/// Initialize logging with the given configuration.
///
/// If console output is disabled, logging stays off and `Ok` is returned.
/// Fails with [`Error::Logging`] when a global subscriber is already set.
pub fn init_logging(config: LoggingConfig) -> Result<LoggingGuard> {
    if !config.console {
        return Ok(LoggingGuard {
            installed: false,
        });
    }

    let env_filter = match config.level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(LevelFilter::INFO.to_string())),
    };

    let console_layer = fmt::layer().with_target(true).with_thread_ids(false).with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;

    Ok(LoggingGuard {
        installed: true,
    })
}
