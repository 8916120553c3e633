//! CLI error types.

use thiserror::Error;

use mwrpc_client::{ClientError, ConfigError};

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors that end a CLI command.
#[derive(Debug, Error)]
pub enum CliError {
    /// The transport reported a failure.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An argument that should be JSON is not.
    #[error("invalid JSON for {what}: {source}")]
    InvalidJson {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Writing output failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
