use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{StoreError, StoreResult};
use crate::fs::FsConnector;
use crate::traits::{Connection, Connector};
use crate::uri::ConnectionString;

/// Maps connection-string schemes to connectors.
///
/// The gateway resolves a routing key to a connection string and hands it to
/// the registry, which picks the connector registered for its scheme.
///
/// ```
/// use std::sync::Arc;
/// use ocs_store::{DriverRegistry, MemoryConnector};
///
/// let registry = DriverRegistry::with_defaults();
/// registry.register(Arc::new(MemoryConnector::new()));
/// assert!(registry.supports("fs"));
/// assert!(registry.supports("mem"));
/// ```
pub struct DriverRegistry {
    connectors: RwLock<HashMap<String, Arc<dyn Connector>>>,
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            connectors: RwLock::new(HashMap::new()),
        }
    }

    /// A registry with the built-in `fs` connector.
    ///
    /// The `mem` connector is not registered by default: its servers live in
    /// the connector instance, so callers register the one they hold.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(FsConnector::new()));
        registry
    }

    /// Register a connector under its scheme, replacing any previous one.
    pub fn register(&self, connector: Arc<dyn Connector>) {
        let scheme = connector.scheme().to_ascii_lowercase();
        self.connectors
            .write()
            .expect("lock poisoned")
            .insert(scheme, connector);
    }

    pub fn supports(&self, scheme: &str) -> bool {
        self.connectors
            .read()
            .expect("lock poisoned")
            .contains_key(&scheme.to_ascii_lowercase())
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self
            .connectors
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect();
        schemes.sort();
        schemes
    }

    /// Connector for the scheme of `uri`.
    pub fn connector_for(&self, uri: &ConnectionString) -> StoreResult<Arc<dyn Connector>> {
        self.connectors
            .read()
            .expect("lock poisoned")
            .get(uri.scheme())
            .cloned()
            .ok_or_else(|| StoreError::UnsupportedScheme(uri.scheme().to_string()))
    }

    /// Parse `uri` and connect through the matching connector.
    pub async fn connect(&self, uri: &str) -> StoreResult<Arc<dyn Connection>> {
        let uri = ConnectionString::parse(uri)?;
        let connector = self.connector_for(&uri)?;
        connector.connect(&uri).await
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}
