//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;

use mwrpc_client::ClientConfig;

use crate::error::CliResult;

/// mwrpc - Talk to a management server over JSON-RPC
#[derive(Debug, Parser)]
#[command(name = "mwrpc")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "MWRPC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long)]
    pub json_logs: bool,

    // --- Connection flags ---
    /// Server host name or address
    #[arg(long, short = 'H', env = "MWRPC_HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short)]
    pub port: Option<u16>,

    /// Login user
    #[arg(long, short, env = "MWRPC_USERNAME")]
    pub username: Option<String>,

    /// API key, or a pass::/env::/file:: reference to one
    #[arg(long, env = "MWRPC_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Use plain ws:// instead of wss://
    #[arg(long)]
    pub no_tls: bool,

    /// Accept any server certificate
    #[arg(long, short = 'k')]
    pub insecure: bool,

    /// Per-call timeout in seconds (0 disables it)
    #[arg(long)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Loads the configuration file and applies command-line overrides.
    ///
    /// An explicit `--config` path must exist and parse; the default path
    /// silently falls back to defaults.
    pub fn load_config(&self) -> CliResult<ClientConfig> {
        let loaded = match self.config {
            Some(ref path) => ClientConfig::load_from(path)?,
            None => ClientConfig::load().unwrap_or_else(|e| {
                debug!(error = %e, "using default configuration");
                ClientConfig::default()
            }),
        };
        Ok(self.apply(loaded))
    }

    /// Applies command-line overrides on top of the loaded configuration.
    pub fn apply(&self, mut config: ClientConfig) -> ClientConfig {
        if let Some(ref host) = self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = Some(port);
        }
        if let Some(ref username) = self.username {
            config.username = Some(username.clone());
        }
        if let Some(ref api_key) = self.api_key {
            config.api_key = Some(api_key.clone());
        }
        if self.no_tls {
            config.use_tls = false;
        }
        if self.insecure {
            config.insecure_skip_verify = true;
        }
        if let Some(timeout) = self.timeout {
            config.request_timeout_secs = timeout;
        }
        config
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Call a method and print its result
    Call {
        /// Method name, e.g. system.info
        method: String,
        /// Parameters as JSON; a non-array value is sent as the only parameter
        params: Option<String>,
    },

    /// Call a job-producing method and wait for the job to finish
    Job {
        /// Method name, e.g. pool.scrub.run
        method: String,
        /// Parameters as JSON; a non-array value is sent as the only parameter
        params: Option<String>,
    },

    /// Print change events of a collection, one JSON document per line
    Subscribe {
        /// Collection name, e.g. reporting.realtime
        collection: String,
        /// Optional filter as JSON
        filter: Option<String>,
        /// Stop after this many events
        #[arg(long, short = 'n')]
        count: Option<usize>,
    },

    /// Print the server version
    Version,

    /// Check that the server answers
    Ping,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump the effective configuration
    Dump,
    /// Validate the configuration and resolve credentials
    Validate,
    /// Show configuration file path
    Path,
}
