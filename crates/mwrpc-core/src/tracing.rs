//! Tracing setup for mwrpc.
//!
//! The library crates only emit `tracing` events; installing a subscriber is
//! left to the binary. Logs always go to stderr so that command output on
//! stdout stays machine-readable.
//!
//! # Usage
//!
//! ```ignore
//! use mwrpc_core::tracing::{init_tracing, TracingConfig};
//!
//! init_tracing(TracingConfig::default()).expect("failed to initialize tracing");
//!
//! // Long-running consumers (e.g. `mwrpc subscribe`) may prefer JSON lines:
//! init_tracing(TracingConfig::streaming()).expect("failed to initialize tracing");
//! ```

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

/// Errors that can occur during tracing initialization
#[derive(Debug, Error)]
pub enum TracingError {
    /// A global subscriber is already installed
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    /// Invalid filter directive
    #[error("failed to parse env filter: {0}")]
    EnvFilter(#[from] tracing_subscriber::filter::ParseError),
}

/// How log lines are rendered on stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TracingOutputFormat {
    /// One line per event (default)
    #[default]
    Compact,
    /// Multi-line, for reading a single session by eye
    Pretty,
    /// JSON lines
    Json,
}

/// Logging settings chosen by the binary.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level for mwrpc crates when RUST_LOG is not set
    pub default_level: Level,
    pub output_format: TracingOutputFormat,
    /// Print source file and line
    pub include_location: bool,
    /// Print the module path
    pub include_target: bool,
    pub include_timestamp: bool,
    /// Filter directive that replaces both RUST_LOG and `default_level`
    pub env_filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_level: Level::WARN,
            output_format: TracingOutputFormat::Compact,
            include_location: false,
            include_target: false,
            include_timestamp: false,
            env_filter: None,
        }
    }
}

impl TracingConfig {
    /// Verbose output for troubleshooting a connection: frame traffic,
    /// call ids and job transitions.
    #[must_use]
    pub fn debug() -> Self {
        Self {
            default_level: Level::DEBUG,
            include_location: true,
            include_target: true,
            include_timestamp: true,
            ..Self::default()
        }
    }

    /// JSON lines with timestamps, for long-lived subscription streams.
    #[must_use]
    pub fn streaming() -> Self {
        Self {
            default_level: Level::INFO,
            output_format: TracingOutputFormat::Json,
            include_target: true,
            include_timestamp: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingOutputFormat) -> Self {
        self.output_format = format;
        self
    }

    #[must_use]
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    fn build_filter(&self) -> Result<EnvFilter, TracingError> {
        if let Some(ref filter) = self.env_filter {
            return Ok(EnvFilter::try_new(filter)?);
        }
        Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("mwrpc={}", self.default_level))))
    }

    fn build_layer(&self, filter: EnvFilter) -> Box<dyn Layer<Registry> + Send + Sync> {
        let base = fmt::layer()
            .with_writer(std::io::stderr)
            .with_file(self.include_location)
            .with_line_number(self.include_location)
            .with_target(self.include_target);

        match (self.output_format, self.include_timestamp) {
            (TracingOutputFormat::Json, _) => base.json().with_filter(filter).boxed(),
            (TracingOutputFormat::Pretty, true) => base.pretty().with_filter(filter).boxed(),
            (TracingOutputFormat::Pretty, false) => {
                base.pretty().without_time().with_filter(filter).boxed()
            }
            (TracingOutputFormat::Compact, true) => base.compact().with_filter(filter).boxed(),
            (TracingOutputFormat::Compact, false) => {
                base.compact().without_time().with_filter(filter).boxed()
            }
        }
    }
}

/// Installs the global subscriber. Call once, from the binary.
///
/// `RUST_LOG` overrides the default level unless an explicit filter is set.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed or the
/// filter directive is invalid.
pub fn init_tracing(config: TracingConfig) -> Result<(), TracingError> {
    let filter = config.build_filter()?;
    let subscriber = tracing_subscriber::registry().with(config.build_layer(filter));
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_quiet() {
        let config = TracingConfig::default();
        assert_eq!(config.default_level, Level::WARN);
        assert_eq!(config.output_format, TracingOutputFormat::Compact);
        assert!(!config.include_timestamp);
        assert!(config.env_filter.is_none());
    }

    #[test]
    fn debug_config() {
        let config = TracingConfig::debug();
        assert_eq!(config.default_level, Level::DEBUG);
        assert!(config.include_location);
    }

    #[test]
    fn streaming_config() {
        let config = TracingConfig::streaming();
        assert_eq!(config.output_format, TracingOutputFormat::Json);
        assert!(config.include_timestamp);
    }

    #[test]
    fn builder_methods() {
        let config = TracingConfig::default()
            .with_level(Level::TRACE)
            .with_format(TracingOutputFormat::Pretty)
            .with_env_filter("mwrpc_client=trace");

        assert_eq!(config.default_level, Level::TRACE);
        assert_eq!(config.output_format, TracingOutputFormat::Pretty);
        assert_eq!(config.env_filter, Some("mwrpc_client=trace".to_string()));
    }

    #[test]
    fn invalid_filter_is_reported() {
        let config = TracingConfig::default().with_env_filter("mwrpc=notalevel");
        assert!(matches!(config.build_filter(), Err(TracingError::EnvFilter(_))));
    }
}
