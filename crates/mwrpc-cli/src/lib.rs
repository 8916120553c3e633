//! CLI for the management API client
//!
//! This crate provides the `mwrpc` command-line interface.

pub mod cli;
pub mod commands;
pub mod error;

pub use cli::Cli;
pub use error::{CliError, CliResult};
