use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ocs_store::{Connection, ConnectionString, Database, DriverRegistry};
use tracing::{debug, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::resolver::EndpointResolver;

#[derive(Debug, Default)]
struct Counters {
    acquired: AtomicU64,
    released: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of a [`ConnectionManager`]'s lease accounting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Leases handed out.
    pub acquired: u64,
    /// Leases given back, explicitly or on drop.
    pub released: u64,
    /// Acquisitions that failed (resolution, unknown scheme, connect, timeout).
    pub failed: u64,
}

impl ConnectionStats {
    /// Leases currently outstanding.
    pub fn in_use(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

/// Acquires time-bounded connections to the backing store.
///
/// Each upload or download takes one [`Lease`] and gives it back before
/// returning, on success and on failure alike. No connection is shared
/// between calls.
pub struct ConnectionManager {
    resolver: Arc<dyn EndpointResolver>,
    drivers: Arc<DriverRegistry>,
    connect_timeout: Duration,
    counters: Arc<Counters>,
}

impl ConnectionManager {
    pub fn new(
        resolver: Arc<dyn EndpointResolver>,
        drivers: Arc<DriverRegistry>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            drivers,
            connect_timeout,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            acquired: self.counters.acquired.load(Ordering::SeqCst),
            released: self.counters.released.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }

    /// Resolve `routing_key` and open a connection within the connect timeout.
    pub async fn acquire(&self, routing_key: &str) -> GatewayResult<Lease> {
        match self.open(routing_key).await {
            Ok(connection) => {
                self.counters.acquired.fetch_add(1, Ordering::SeqCst);
                debug!(key = routing_key, "connection acquired");
                Ok(Lease {
                    key: routing_key.to_string(),
                    connection,
                    counters: Arc::clone(&self.counters),
                    released: false,
                })
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                warn!(key = routing_key, error = %e, "connection acquisition failed");
                Err(e)
            }
        }
    }

    async fn open(&self, key: &str) -> GatewayResult<Arc<dyn Connection>> {
        let uri = self.resolver.resolve(key).map_err(|e| match e {
            e @ GatewayError::Connection { .. } => e,
            other => GatewayError::connection(key, other),
        })?;
        let uri = ConnectionString::parse(&uri).map_err(|e| GatewayError::connection(key, e))?;
        let connector = self
            .drivers
            .connector_for(&uri)
            .map_err(|e| GatewayError::connection(key, e))?;

        match tokio::time::timeout(self.connect_timeout, connector.connect(&uri)).await {
            Ok(Ok(connection)) => Ok(connection),
            Ok(Err(e)) => Err(GatewayError::connection(key, e)),
            Err(_) => Err(GatewayError::connection(
                key,
                format!(
                    "timed out after {} ms connecting to {uri}",
                    self.connect_timeout.as_millis()
                ),
            )),
        }
    }

    /// Run `op` against database `namespace` on a freshly acquired lease,
    /// releasing the lease whatever `op` returns.
    pub async fn scoped<T, F, Fut>(&self, routing_key: &str, namespace: &str, op: F) -> GatewayResult<T>
    where
        F: FnOnce(Arc<dyn Database>) -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let lease = self.acquire(routing_key).await?;
        let result = match lease.database(namespace) {
            Ok(db) => op(db).await,
            Err(e) => Err(e),
        };
        lease.release().await;
        result
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("drivers", &self.drivers)
            .field("connect_timeout", &self.connect_timeout)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A connection held for the duration of one call.
///
/// Give it back with [`Lease::release`]. A lease dropped without release
/// (panic, cancelled future) is still counted as released and its
/// connection is closed in the background.
pub struct Lease {
    key: String,
    connection: Arc<dyn Connection>,
    counters: Arc<Counters>,
    released: bool,
}

impl Lease {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn database(&self, name: &str) -> GatewayResult<Arc<dyn Database>> {
        Ok(self.connection.database(name)?)
    }

    /// Close the connection. Close failures are logged, not returned, so they
    /// never mask the outcome of the call that held the lease.
    pub async fn release(mut self) {
        self.released = true;
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.connection.close().await {
            warn!(key = %self.key, error = %e, "closing connection failed");
        }
        debug!(key = %self.key, "connection released");
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        warn!(key = %self.key, "lease dropped without release");

        let connection = Arc::clone(&self.connection);
        let key = self.key.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = connection.close().await {
                    warn!(key = %key, error = %e, "closing dropped lease failed");
                }
            });
        }
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("key", &self.key)
            .field("released", &self.released)
            .finish()
    }
}
