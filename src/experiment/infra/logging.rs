//! Structured logging setup.
//!
//! Stdout logging in one of three formats, plus an optional daily-rotated
//! JSON log file written through `tracing-appender`.
//!
//! # Component Targets
//!
//! | Target | Description |
//! |--------|-------------|
//! | `forecast_ax::scoring` | Distribution building and CRPS |
//! | `forecast_ax::reconcile` | Outcome joins and record completion |
//! | `forecast_ax::dataset` | Standardization and outlier filtering |
//! | `forecast_ax::estimator` | Fixed-effects regression |
//! | `forecast_ax::weights` | Assignment weight updates |
//! | `forecast_ax::store` | Record persistence |
//!
//! ```bash
//! RUST_LOG=info,forecast_ax::estimator=debug forecast_ax run --records records.json
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::errors::{Error, Result};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable format with colors (default for development)
    #[default]
    Pretty,
    /// JSON format (best for log aggregation)
    Json,
    /// Compact single-line format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            other => Err(Error::config(format!(
                "unknown log format '{other}'. Use: pretty, json, compact"
            ))),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Format for stdout logging
    pub format: LogFormat,
    /// Directory for the rotated JSON log file; no file when unset
    pub log_dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            log_dir: None,
        }
    }
}

/// Initialize the global subscriber.
///
/// Returns the file writer's `WorkerGuard` when file logging is enabled; it
/// must be kept alive for buffered lines to be flushed.
pub fn init_logging(
    config: &LogConfig,
    env_filter_override: Option<&str>,
) -> Result<Option<WorkerGuard>> {
    let filter = match env_filter_override {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level)),
    };

    let stdout_layer = match config.format {
        LogFormat::Json => fmt::layer().json().boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
        LogFormat::Pretty => fmt::layer().with_target(false).boxed(),
    };

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "forecast_ax.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .json()
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::config(format!("logging already initialized: {e}")))?;

    if let Some(dir) = &config.log_dir {
        eprintln!("Logging to {}", dir.display());
    }
    Ok(guard)
}

/// Log target constants for component-specific logging.
///
/// ```ignore
/// tracing::debug!(target: targets::ESTIMATOR, n_obs, "Model fitted");
/// ```
pub mod targets {
    /// Distribution building and CRPS
    pub const SCORING: &str = "forecast_ax::scoring";
    /// Outcome joins and record completion
    pub const RECONCILE: &str = "forecast_ax::reconcile";
    /// Standardization and outlier filtering
    pub const DATASET: &str = "forecast_ax::dataset";
    /// Fixed-effects regression
    pub const ESTIMATOR: &str = "forecast_ax::estimator";
    /// Assignment weight updates
    pub const WEIGHTS: &str = "forecast_ax::weights";
    /// Record persistence
    pub const STORE: &str = "forecast_ax::store";
    /// Whole experiment cycle
    pub const CYCLE: &str = "forecast_ax::cycle";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_log_format_serde() {
        let json = serde_json::to_string(&LogFormat::Json).unwrap();
        assert_eq!(json, "\"json\"");

        let parsed: LogFormat = serde_json::from_str("\"compact\"").unwrap();
        assert_eq!(parsed, LogFormat::Compact);
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
