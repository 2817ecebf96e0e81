//! Subscriber setup for worker diagnostics.
//!
//! Routing decisions log at `debug`, the plugin pipeline at `trace`, and
//! lifecycle summaries at `info`; the filter below selects among them.

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{Result, SwError};

/// Crates whose events pass the default filter at the configured level.
const WORKER_TARGETS: &[&str] = &["rustkit_sw", "rustkit_sw_precaching"];

/// Output shape of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    /// One JSON object per event, fields included.
    Json,
}

/// How the worker's tracing subscriber is built.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level for the worker crates; everything else logs at `warn`.
    pub level: Level,
    pub format: LogFormat,
    /// Directive string replacing the default filter, e.g.
    /// `"rustkit_sw::routing=trace,reqwest=warn"`.
    pub filter: Option<String>,
    pub source_location: bool,
    /// Emit an event when a span closes, with its busy/idle times.
    pub span_timings: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            filter: None,
            source_location: false,
            span_timings: false,
        }
    }
}

impl LogConfig {
    /// Everything the worker crates emit, with file and line.
    pub fn verbose() -> Self {
        Self {
            level: Level::TRACE,
            source_location: true,
            span_timings: true,
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// The explicit filter if it parses, else `RUST_LOG`, else the worker
    /// targets at `level` on top of `warn`.
    pub fn env_filter(&self) -> EnvFilter {
        if let Some(Ok(filter)) = self.filter.as_deref().map(EnvFilter::try_new) {
            return filter;
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.default_directives()))
    }

    fn default_directives(&self) -> String {
        WORKER_TARGETS.iter().fold(String::from("warn"), |mut acc, target| {
            acc.push_str(&format!(",{target}={}", self.level.as_str().to_ascii_lowercase()));
            acc
        })
    }
}

/// Install the global subscriber described by `config`.
///
/// Fails with a config error if a global subscriber is already installed.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let spans = if config.span_timings {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let registry = tracing_subscriber::registry().with(config.env_filter());

    let installed = match config.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_span_events(spans)
                    .with_file(config.source_location)
                    .with_line_number(config.source_location),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_span_events(spans))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_span_events(spans))
            .try_init(),
    };
    installed.map_err(|e| SwError::Config(format!("global subscriber already set: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_cover_both_crates() {
        let config = LogConfig {
            level: Level::DEBUG,
            ..LogConfig::default()
        };
        assert_eq!(
            config.default_directives(),
            "warn,rustkit_sw=debug,rustkit_sw_precaching=debug"
        );
    }

    #[test]
    fn test_verbose_config() {
        let config = LogConfig::verbose().with_format(LogFormat::Json);
        assert_eq!(config.level, Level::TRACE);
        assert!(config.source_location && config.span_timings);
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_log_format_from_json() {
        let format: LogFormat = serde_json::from_str("\"compact\"").unwrap();
        assert_eq!(format, LogFormat::Compact);
    }

    #[test]
    fn test_second_init_is_an_error() {
        let _ = init_logging(LogConfig::default().with_filter("rustkit_sw=trace"));
        assert!(matches!(
            init_logging(LogConfig::default()),
            Err(SwError::Config(_))
        ));
    }
}
