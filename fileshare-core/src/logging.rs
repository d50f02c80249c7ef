//! Tracing subscriber setup

use std::fs::OpenOptions;
use std::str::FromStr;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    fmt::{format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::LoggingConfig;

/// Encoding of emitted log records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per record, for log shippers
    Json,
    /// Multi-line human readable output
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(anyhow::anyhow!("Unknown log format: {other:?}")),
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG`, when set, replaces `config.level`. With `file_path` set,
/// records are appended to that file without colour codes.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let default_level = level_filter(&config.level)?;
    let format: LogFormat = config.format.parse()?;

    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let (writer, ansi) = match &config.file_path {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            (BoxMakeWriter::new(Arc::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stdout), true),
    };

    tracing_subscriber::registry()
        .with(output_layer(format, writer, ansi))
        .with(filter)
        .try_init()?;
    Ok(())
}

fn output_layer(format: LogFormat, writer: BoxMakeWriter, ansi: bool) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_line_number(true);

    match format {
        LogFormat::Json => layer.json().with_current_span(true).with_file(true).boxed(),
        LogFormat::Pretty => layer.pretty().with_ansi(ansi).with_file(false).boxed(),
    }
}

/// Level name from configuration; "warning" is accepted for "warn"
fn level_filter(level: &str) -> anyhow::Result<LevelFilter> {
    let normalized = level.trim().to_ascii_lowercase();
    let name = match normalized.as_str() {
        "warning" => "warn",
        other => other,
    };
    match name {
        "trace" | "debug" | "info" | "warn" | "error" => name
            .parse::<tracing::Level>()
            .map(LevelFilter::from_level)
            .map_err(|e| anyhow::anyhow!("Invalid log level {level:?}: {e}")),
        _ => Err(anyhow::anyhow!("Invalid log level: {level:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter() {
        assert_eq!(level_filter("trace").unwrap(), LevelFilter::TRACE);
        assert_eq!(level_filter(" INFO ").unwrap(), LevelFilter::INFO);
        assert_eq!(level_filter("warning").unwrap(), LevelFilter::WARN);
        assert_eq!(level_filter("error").unwrap(), LevelFilter::ERROR);
        assert!(level_filter("3").is_err());
        assert!(level_filter("invalid").is_err());
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_init_logging_rejects_bad_settings() {
        let config = LoggingConfig {
            level: "loud".to_string(),
            ..LoggingConfig::default()
        };
        assert!(init_logging(&config).is_err());

        let config = LoggingConfig {
            format: "xml".to_string(),
            ..LoggingConfig::default()
        };
        assert!(init_logging(&config).is_err());
    }
}
