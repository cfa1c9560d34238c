use std::collections::BTreeMap;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};

/// Routing key consulted when a key has no entry of its own.
pub const DEFAULT_ENDPOINT_KEY: &str = "default";

/// Maps an opaque routing key to a backing-store connection string.
///
/// Resolution is synchronous; a failure fails the whole call.
pub trait EndpointResolver: Send + Sync {
    fn resolve(&self, key: &str) -> GatewayResult<String>;
}

impl<F> EndpointResolver for F
where
    F: Fn(&str) -> GatewayResult<String> + Send + Sync,
{
    fn resolve(&self, key: &str) -> GatewayResult<String> {
        self(key)
    }
}

/// Resolver backed by a fixed table, typically `[endpoints]` from config.
#[derive(Clone, Debug, Default)]
pub struct StaticResolver {
    endpoints: BTreeMap<String, String>,
}

impl StaticResolver {
    pub fn new(endpoints: BTreeMap<String, String>) -> Self {
        Self { endpoints }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.endpoints.clone())
    }

    /// Resolver sending every key to `uri`.
    pub fn single(uri: impl Into<String>) -> Self {
        let mut endpoints = BTreeMap::new();
        endpoints.insert(DEFAULT_ENDPOINT_KEY.to_string(), uri.into());
        Self { endpoints }
    }

    pub fn insert(&mut self, key: impl Into<String>, uri: impl Into<String>) {
        self.endpoints.insert(key.into(), uri.into());
    }
}

impl EndpointResolver for StaticResolver {
    fn resolve(&self, key: &str) -> GatewayResult<String> {
        self.endpoints
            .get(key)
            .or_else(|| self.endpoints.get(DEFAULT_ENDPOINT_KEY))
            .cloned()
            .ok_or_else(|| GatewayError::connection(key, "no endpoint configured"))
    }
}
