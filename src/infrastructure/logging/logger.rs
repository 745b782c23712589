use anyhow::{Context, Result};
use std::io;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::domain::models::config::{LogFormat, LoggingConfig, RotationPolicy};

const LOG_FILE_PREFIX: &str = "mcp-ledger.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Logger implementation using tracing
///
/// Console output goes to stderr only. In `wrap` mode stdout carries the
/// wrapped server's protocol stream and must never see a log line.
pub struct LoggerImpl {
    _guard: Option<WorkerGuard>,
}

impl LoggerImpl {
    /// Install the global subscriber described by `config`.
    ///
    /// `RUST_LOG` overrides the configured level when set.
    ///
    /// # Errors
    /// Returns an error for an unknown level or if a global subscriber is
    /// already installed
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let default_level = parse_log_level(&config.level)?;

        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut guard = None;

        if let Some(log_dir) = &config.log_dir {
            let appender = match config.rotation {
                RotationPolicy::Daily => rolling::daily(log_dir, LOG_FILE_PREFIX),
                RotationPolicy::Hourly => rolling::hourly(log_dir, LOG_FILE_PREFIX),
                RotationPolicy::Never => rolling::never(log_dir, LOG_FILE_PREFIX),
            };
            let (writer, file_guard) = tracing_appender::non_blocking(appender);

            // Files are always JSON for machine consumption
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_current_span(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(env_filter(default_level))
                .boxed();
            layers.push(layer);
            guard = Some(file_guard);
        }

        if config.enable_stderr {
            layers.push(stderr_layer(config.format, default_level));
        }

        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .context("Failed to install tracing subscriber")?;

        tracing::debug!(
            level = %config.level,
            format = ?config.format,
            file_output = config.log_dir.is_some(),
            "logger initialized"
        );

        Ok(Self { _guard: guard })
    }
}

fn env_filter(default_level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy()
}

fn stderr_layer(format: LogFormat, default_level: Level) -> BoxedLayer {
    match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_current_span(true)
            .with_target(true)
            .with_filter(env_filter(default_level))
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .with_filter(env_filter(default_level))
            .boxed(),
    }
}

/// Parse log level string to Level
fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!("Invalid log level: {level}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("debug"), Ok(Level::DEBUG)));
        assert!(matches!(parse_log_level("info"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));
        assert!(matches!(parse_log_level("error"), Ok(Level::ERROR)));
        assert!(matches!(parse_log_level("TRACE"), Ok(Level::TRACE)));
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_init_rejects_unknown_level() {
        let config = LoggingConfig {
            level: "loud".to_string(),
            ..LoggingConfig::default()
        };
        assert!(LoggerImpl::init(&config).is_err());
    }

    // Installing the global subscriber is covered once, with file output;
    // a second init in the same process would fail.
    #[test]
    fn test_logger_init_with_file_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Json,
            log_dir: Some(dir.path().to_path_buf()),
            rotation: RotationPolicy::Never,
            enable_stderr: false,
        };

        let logger = LoggerImpl::init(&config).unwrap();
        tracing::info!(provider = "github", "file logging works");
        drop(logger);

        let contents = std::fs::read_to_string(dir.path().join(LOG_FILE_PREFIX)).unwrap();
        assert!(contents.contains("file logging works"));
    }
}
