//! Secret reference resolver.
//!
//! Credential values in `config.toml` can point at secrets stored outside
//! the file:
//!
//! - `pass::path/in/store` runs `pass show path/in/store`, returns the first line
//! - `env::VAR_NAME` reads `$VAR_NAME` from the environment
//! - `file::/path/to/key` reads the first line of a file
//! - anything else is returned as-is (plain text)

use thiserror::Error;

/// Errors from resolving a secret reference.
#[derive(Debug, Error)]
pub enum SecretError {
    /// `pass` could not be run or exited unsuccessfully.
    #[error("`pass show {path}` failed: {reason}")]
    Pass { path: String, reason: String },

    /// The referenced environment variable is unset or not unicode.
    #[error("environment variable `{0}` is not set")]
    EnvMissing(String),

    /// The referenced file could not be read.
    #[error("failed to read `{path}`: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The source produced nothing usable.
    #[error("{0} produced no output")]
    Empty(String),
}

/// Resolves a value that may contain a secret reference prefix.
pub fn resolve(value: &str) -> Result<String, SecretError> {
    if let Some(path) = value.strip_prefix("pass::") {
        resolve_pass(path)
    } else if let Some(var) = value.strip_prefix("env::") {
        resolve_env(var)
    } else if let Some(path) = value.strip_prefix("file::") {
        resolve_file(path)
    } else {
        Ok(value.to_string())
    }
}

/// Returns true if the value is a reference rather than a literal.
pub fn is_reference(value: &str) -> bool {
    ["pass::", "env::", "file::"]
        .iter()
        .any(|prefix| value.starts_with(prefix))
}

fn resolve_pass(path: &str) -> Result<String, SecretError> {
    let output = std::process::Command::new("pass")
        .arg("show")
        .arg(path)
        .output()
        .map_err(|e| SecretError::Pass {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SecretError::Pass {
            path: path.to_string(),
            reason: format!("exit {}: {}", output.status, stderr.trim()),
        });
    }

    first_line(&String::from_utf8_lossy(&output.stdout))
        .ok_or_else(|| SecretError::Empty(format!("`pass show {}`", path)))
}

fn resolve_env(var: &str) -> Result<String, SecretError> {
    std::env::var(var).map_err(|_| SecretError::EnvMissing(var.to_string()))
}

fn resolve_file(path: &str) -> Result<String, SecretError> {
    let content = std::fs::read_to_string(path).map_err(|source| SecretError::File {
        path: path.to_string(),
        source,
    })?;
    first_line(&content).ok_or_else(|| SecretError::Empty(format!("`{}`", path)))
}

fn first_line(text: &str) -> Option<String> {
    text.lines()
        .next()
        .map(|line| line.trim_end().to_string())
        .filter(|line| !line.is_empty())
}
