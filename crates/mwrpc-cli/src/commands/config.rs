//! Configuration commands.

use std::io::Write;

use mwrpc_client::ClientConfig;

use crate::error::CliResult;

/// Dump the effective configuration.
///
/// The API key is printed as configured, so secret references stay
/// references.
pub fn dump(config: &ClientConfig, out: &mut dyn Write) -> CliResult<()> {
    let toml_str = config.to_toml()?;
    writeln!(out, "# config.toml ({})", ClientConfig::default_path().display())?;
    writeln!(out, "{}", toml_str)?;
    Ok(())
}

/// Validate the configuration and resolve credentials.
pub fn validate(config: &ClientConfig, out: &mut dyn Write) -> CliResult<()> {
    config.validate()?;
    let credentials = config.resolve_credentials()?;
    writeln!(out, "Credentials for {} resolved.", credentials.username)?;
    writeln!(out, "Configuration is valid.")?;
    Ok(())
}

/// Show the configuration file path.
pub fn path(out: &mut dyn Write) -> CliResult<()> {
    writeln!(out, "config: {}", ClientConfig::default_path().display())?;
    Ok(())
}
