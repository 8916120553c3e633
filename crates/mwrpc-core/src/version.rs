//! Server version detected during the handshake.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// First `<major>.<minor>` pair in a version string.
static VERSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\.(\d+)").expect("Invalid version regex"));

/// Server version, cached once per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Major release number.
    pub major: u32,
    /// Minor release number.
    pub minor: u32,
}

impl Version {
    /// Creates a version.
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Extracts the first `major.minor` pair from a server version string.
    ///
    /// ```rust
    /// use mwrpc_core::Version;
    ///
    /// assert_eq!(Version::parse("TrueNAS-SCALE-24.10.2"), Some(Version::new(24, 10)));
    /// assert_eq!(Version::parse("25.04"), Some(Version::new(25, 4)));
    /// assert_eq!(Version::parse("unknown"), None);
    /// ```
    pub fn parse(raw: &str) -> Option<Self> {
        let captures = VERSION_REGEX.captures(raw)?;
        let major = captures.get(1)?.as_str().parse().ok()?;
        let minor = captures.get(2)?.as_str().parse().ok()?;
        Some(Self { major, minor })
    }

    /// Returns true if this version is at least `major.minor`.
    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        *self >= Self::new(major, minor)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
