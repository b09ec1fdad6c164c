//! Logging configuration.

use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "mediacache=info";
const VERBOSE_FILTER: &str = "mediacache=debug";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parses a format name, defaulting to [`LogFormat::Pretty`].
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Line format.
    pub format: LogFormat,
    /// Optional log file; stderr when absent.
    pub file: Option<PathBuf>,
    /// Level filter.
    pub filter: EnvFilter,
}

impl LoggingConfig {
    /// Builds logging configuration from `RUST_LOG`, `MEDIACACHE_LOG_FORMAT`
    /// and `MEDIACACHE_LOG_FILE`.
    #[must_use]
    pub fn from_env(verbose: bool) -> Self {
        let fallback = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
        let format = std::env::var("MEDIACACHE_LOG_FORMAT")
            .map(|v| LogFormat::parse(&v))
            .unwrap_or_default();
        let file = std::env::var("MEDIACACHE_LOG_FILE").ok().map(PathBuf::from);

        Self {
            format,
            file,
            filter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("anything"), LogFormat::Pretty);
    }
}
