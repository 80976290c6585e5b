//! # Observability
//!
//! Subscriber setup for relay services.
//!
//! Services call [`init_with_config`] once at startup and use the `tracing`
//! macros everywhere else. They never need to know where log lines end up:
//!
//! - **Compact**: human-readable lines on stderr (the default).
//! - **Json**: one JSON object per line on stderr, for log shippers.
//! - An optional append-only JSONL file receives every event as well,
//!   regardless of the stderr format.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "intercom-relay".into(),
//!     default_level: "info".into(),
//!     ..Default::default()
//! })?;
//! tracing::info!("ready");
//! ```

mod json_layer;
mod writer;

use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub use json_layer::{JsonLayer, LogEntry};
pub use writer::{AppendLogWriter, WriterFactory};

/// Errors raised while installing the global subscriber.
#[derive(Error, Debug)]
pub enum ObservabilityError {
    /// The log file could not be created or opened.
    #[error("Failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A global subscriber was already installed.
    #[error("Failed to install subscriber: {0}")]
    Init(String),

    /// Unknown value for the stderr output format.
    #[error("Unknown log format: {0} (expected \"compact\" or \"json\")")]
    UnknownFormat(String),
}

/// Output format for stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Compact human-readable lines.
    #[default]
    Compact,
    /// Structured JSON lines.
    Json,
}

impl FromStr for LogFormat {
    type Err = ObservabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(ObservabilityError::UnknownFormat(other.to_string())),
        }
    }
}

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, written into every JSON line.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Overridden by the `RUST_LOG` environment variable when set.
    pub default_level: String,

    /// Output format for stderr.
    pub format: LogFormat,

    /// Optional JSONL file that receives a copy of every event.
    pub log_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            format: LogFormat::Compact,
            log_path: None,
        }
    }
}

/// Install the global subscriber described by `config`.
///
/// Fails if the log file cannot be opened or a subscriber is already set.
pub fn init_with_config(config: LogConfig) -> Result<(), ObservabilityError> {
    let file_layer = match &config.log_path {
        Some(path) => {
            let writer =
                AppendLogWriter::open(path).map_err(|source| ObservabilityError::LogFile {
                    path: path.clone(),
                    source,
                })?;
            Some(JsonLayer::new(
                config.service_name.clone(),
                WriterFactory::new(writer),
            ))
        }
        None => None,
    };

    let compact_layer = (config.format == LogFormat::Compact).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(io::stderr)
    });

    let json_layer = (config.format == LogFormat::Json).then(|| {
        JsonLayer::new(
            config.service_name.clone(),
            io::stderr as fn() -> io::Stderr,
        )
    });

    tracing_subscriber::registry()
        .with(compact_layer.map(|l| l.with_filter(env_filter(&config.default_level))))
        .with(json_layer.map(|l| l.with_filter(env_filter(&config.default_level))))
        .with(file_layer.map(|l| l.with_filter(env_filter(&config.default_level))))
        .try_init()
        .map_err(|e| ObservabilityError::Init(e.to_string()))?;

    tracing::debug!(
        service = %config.service_name,
        format = ?config.format,
        log_path = ?config.log_path,
        "observability initialized"
    );

    Ok(())
}

/// Build the event filter: `RUST_LOG` if set, otherwise `default_level`.
fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert_eq!(config.format, LogFormat::Compact);
        assert!(config.log_path.is_none());
    }

    #[test]
    fn log_format_parses_known_values() {
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert_eq!("TEXT".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert_eq!(" json ".parse::<LogFormat>().unwrap(), LogFormat::Json);
    }

    #[test]
    fn log_format_rejects_unknown_values() {
        let err = "yaml".parse::<LogFormat>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown log format: yaml (expected \"compact\" or \"json\")"
        );
    }

    #[test]
    fn unopenable_log_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending.
        let config = LogConfig {
            service_name: "test".into(),
            log_path: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let err = init_with_config(config).unwrap_err();
        assert!(matches!(err, ObservabilityError::LogFile { .. }));
    }
}
