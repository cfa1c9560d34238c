use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// A parsed `scheme://target` connection string.
///
/// The target is opaque to the gateway; each driver interprets its own
/// (`mem://<server>`, `fs://<directory>`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionString {
    scheme: String,
    target: String,
}

impl ConnectionString {
    pub fn parse(uri: &str) -> Result<Self, StoreError> {
        let invalid = |reason: &str| StoreError::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, target) = uri
            .trim()
            .split_once("://")
            .ok_or_else(|| invalid("expected scheme://target"))?;
        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
        {
            return Err(invalid("scheme must be non-empty ASCII alphanumerics"));
        }
        if target.is_empty() {
            return Err(invalid("empty target"));
        }

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            target: target.to_string(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl FromStr for ConnectionString {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.target)
    }
}
