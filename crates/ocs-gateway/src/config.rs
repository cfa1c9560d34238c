use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

/// Default chunk size for chunked objects (255 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 255 * 1024;

/// Gateway configuration, usually loaded from TOML.
///
/// ```toml
/// connect_timeout_ms = 3000
/// transfer_timeout_ms = 60000
/// chunk_size = 261120
///
/// [endpoints]
/// default = "fs:///var/lib/ocs"
/// raw-document-insert = "mem://documents"
/// ```
///
/// The inline/chunked size threshold is deliberately absent: it is a
/// constant shared by every reader and writer ([`ocs_types::INLINE_THRESHOLD`]).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Upper bound on resolving and opening one backing connection.
    pub connect_timeout_ms: u64,
    /// Upper bound on one chunked transfer. `0` disables the deadline.
    pub transfer_timeout_ms: u64,
    /// Maximum bytes per chunk document.
    pub chunk_size: usize,
    /// Routing key to connection string. The `default` entry serves any key
    /// without its own entry.
    pub endpoints: BTreeMap<String, String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3_000,
            transfer_timeout_ms: 60_000,
            chunk_size: DEFAULT_CHUNK_SIZE,
            endpoints: BTreeMap::new(),
        }
    }
}

impl GatewayConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn transfer_timeout(&self) -> Option<Duration> {
        (self.transfer_timeout_ms > 0).then(|| Duration::from_millis(self.transfer_timeout_ms))
    }

    /// Add or replace an endpoint, builder-style.
    pub fn with_endpoint(mut self, key: impl Into<String>, uri: impl Into<String>) -> Self {
        self.endpoints.insert(key.into(), uri.into());
        self
    }

    pub fn from_toml_str(s: &str) -> GatewayResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| GatewayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> GatewayResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> GatewayResult<String> {
        toml::to_string(self).map_err(|e| GatewayError::Config(e.to_string()))
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.connect_timeout_ms == 0 {
            return Err(GatewayError::Config("connect_timeout_ms must be positive".into()));
        }
        if self.chunk_size == 0 {
            return Err(GatewayError::Config("chunk_size must be positive".into()));
        }
        Ok(())
    }
}
