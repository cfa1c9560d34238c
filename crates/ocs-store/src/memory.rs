use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::document::{Document, DocumentId, Filter};
use crate::error::{StoreError, StoreResult};
use crate::traits::{ensure_id, validate_name, Connection, Connector, Database};
use crate::uri::ConnectionString;

type CollectionKey = (String, String);

/// In-process document server.
///
/// Intended for tests and embedding. Every connection to the same server
/// sees the same data. Documents are held behind a `RwLock` and cloned on
/// read and write.
pub struct MemoryServer {
    name: String,
    collections: RwLock<HashMap<CollectionKey, Vec<Document>>>,
    open_connections: AtomicUsize,
    total_connections: AtomicU64,
    connect_delay: Mutex<Option<Duration>>,
    insert_delay: Mutex<Option<Duration>>,
    find_delay: Mutex<Option<Duration>>,
    insert_budget: Mutex<Option<usize>>,
}

impl MemoryServer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: RwLock::new(HashMap::new()),
            open_connections: AtomicUsize::new(0),
            total_connections: AtomicU64::new(0),
            connect_delay: Mutex::new(None),
            insert_delay: Mutex::new(None),
            find_delay: Mutex::new(None),
            insert_budget: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connections opened and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::SeqCst)
    }

    /// Connections ever opened.
    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::SeqCst)
    }

    /// Delay every subsequent `connect` by `delay`.
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        *self.connect_delay.lock().expect("lock poisoned") = delay;
    }

    /// Delay every subsequent insert by `delay`.
    pub fn set_insert_delay(&self, delay: Option<Duration>) {
        *self.insert_delay.lock().expect("lock poisoned") = delay;
    }

    /// Delay every subsequent `find` and `find_one` by `delay`.
    pub fn set_find_delay(&self, delay: Option<Duration>) {
        *self.find_delay.lock().expect("lock poisoned") = delay;
    }

    /// Accept `remaining` more inserts, then reject every insert.
    /// `None` removes the limit.
    pub fn fail_inserts_after(&self, remaining: Option<usize>) {
        *self.insert_budget.lock().expect("lock poisoned") = remaining;
    }

    /// Number of documents in a collection.
    pub fn document_count(&self, database: &str, collection: &str) -> usize {
        self.collections
            .read()
            .expect("lock poisoned")
            .get(&(database.to_string(), collection.to_string()))
            .map_or(0, Vec::len)
    }

    /// Copy of every document in a collection, in insertion order.
    pub fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .expect("lock poisoned")
            .get(&(database.to_string(), collection.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Remove all data. Connection counters are kept.
    pub fn clear(&self) {
        self.collections.write().expect("lock poisoned").clear();
    }

    fn take_insert_permit(&self) -> StoreResult<()> {
        let mut budget = self.insert_budget.lock().expect("lock poisoned");
        match budget.as_mut() {
            Some(0) => Err(StoreError::WriteRejected(format!(
                "server {} is not accepting inserts",
                self.name
            ))),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for MemoryServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let collections = self.collections.read().expect("lock poisoned").len();
        f.debug_struct("MemoryServer")
            .field("name", &self.name)
            .field("collections", &collections)
            .field("open_connections", &self.open_connections())
            .finish()
    }
}

/// Connector for `mem://<server>` connection strings.
///
/// Servers must be registered before they can be reached; connecting to an
/// unregistered name fails with [`StoreError::Unreachable`].
#[derive(Default)]
pub struct MemoryConnector {
    servers: RwLock<HashMap<String, Arc<MemoryServer>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the server registered under `name`, creating it if absent.
    pub fn server(&self, name: &str) -> Arc<MemoryServer> {
        let mut servers = self.servers.write().expect("lock poisoned");
        Arc::clone(
            servers
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(MemoryServer::new(name))),
        )
    }

    /// Make `name` unreachable. Existing connections keep working.
    pub fn remove_server(&self, name: &str) -> Option<Arc<MemoryServer>> {
        self.servers.write().expect("lock poisoned").remove(name)
    }

    fn lookup(&self, name: &str) -> Option<Arc<MemoryServer>> {
        self.servers.read().expect("lock poisoned").get(name).cloned()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn scheme(&self) -> &'static str {
        "mem"
    }

    async fn connect(&self, uri: &ConnectionString) -> StoreResult<Arc<dyn Connection>> {
        let server = self
            .lookup(uri.target())
            .ok_or_else(|| StoreError::Unreachable(uri.to_string()))?;

        let delay = *server.connect_delay.lock().expect("lock poisoned");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        server.open_connections.fetch_add(1, Ordering::SeqCst);
        server.total_connections.fetch_add(1, Ordering::SeqCst);
        debug!(server = %server.name, "memory connection opened");

        Ok(Arc::new(MemoryConnection {
            server,
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct MemoryConnection {
    server: Arc<MemoryServer>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn database(&self, name: &str) -> StoreResult<Arc<dyn Database>> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        validate_name(name)?;
        Ok(Arc::new(MemoryDatabase {
            server: Arc::clone(&self.server),
            name: name.to_string(),
            closed: Arc::clone(&self.closed),
        }))
    }

    async fn close(&self) -> StoreResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.server.open_connections.fetch_sub(1, Ordering::SeqCst);
            debug!(server = %self.server.name, "memory connection closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MemoryDatabase {
    server: Arc<MemoryServer>,
    name: String,
    closed: Arc<AtomicBool>,
}

impl MemoryDatabase {
    fn check_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn key(&self, collection: &str) -> CollectionKey {
        (self.name.clone(), collection.to_string())
    }

    async fn find_latency(&self) {
        let delay = *self.server.find_delay.lock().expect("lock poisoned");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert_one(&self, collection: &str, mut document: Document) -> StoreResult<DocumentId> {
        self.check_open()?;
        validate_name(collection)?;
        let delay = *self.server.insert_delay.lock().expect("lock poisoned");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.server.take_insert_permit()?;
        let id = ensure_id(&mut document)?;
        let mut map = self.server.collections.write().expect("lock poisoned");
        let docs = map.entry(self.key(collection)).or_default();
        if docs.iter().any(|d| d.id() == Some(id)) {
            return Err(StoreError::WriteRejected(format!("duplicate _id {id}")));
        }
        docs.push(document);
        Ok(id)
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Document>> {
        self.check_open()?;
        self.find_latency().await;
        let map = self.server.collections.read().expect("lock poisoned");
        Ok(map
            .get(&self.key(collection))
            .and_then(|docs| docs.iter().find(|d| filter.matches(d)).cloned()))
    }

    async fn find(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>> {
        self.check_open()?;
        self.find_latency().await;
        let map = self.server.collections.read().expect("lock poisoned");
        Ok(map
            .get(&self.key(collection))
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(target: &str) -> ConnectionString {
        ConnectionString::parse(&format!("mem://{target}")).unwrap()
    }

    async fn connect(connector: &MemoryConnector, target: &str) -> Arc<dyn Connection> {
        connector.connect(&uri(target)).await.unwrap()
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn unregistered_server_is_unreachable() {
        let connector = MemoryConnector::new();
        let err = connector.connect(&uri("nowhere")).await.err().unwrap();
        assert!(matches!(err, StoreError::Unreachable(_)));
    }

    #[tokio::test]
    async fn connection_counters() {
        let connector = MemoryConnector::new();
        let server = connector.server("primary");

        let a = connect(&connector, "primary").await;
        let b = connect(&connector, "primary").await;
        assert_eq!(server.open_connections(), 2);
        assert_eq!(server.total_connections(), 2);

        a.close().await.unwrap();
        a.close().await.unwrap(); // second close is a no-op
        assert_eq!(server.open_connections(), 1);

        b.close().await.unwrap();
        assert_eq!(server.open_connections(), 0);
        assert_eq!(server.total_connections(), 2);
    }

    #[tokio::test]
    async fn closed_connection_rejects_use() {
        let connector = MemoryConnector::new();
        connector.server("primary");
        let conn = connect(&connector, "primary").await;
        let db = conn.database("db").unwrap();
        conn.close().await.unwrap();

        assert!(conn.is_closed());
        assert!(matches!(conn.database("db"), Err(StoreError::Closed)));
        let err = db.insert_one("c", Document::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::Closed));
    }

    #[tokio::test]
    async fn removed_server_is_unreachable() {
        let connector = MemoryConnector::new();
        connector.server("primary");
        assert!(connector.remove_server("primary").is_some());
        assert!(connector.connect(&uri("primary")).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_delay_is_applied() {
        let connector = MemoryConnector::new();
        connector
            .server("slow")
            .set_connect_delay(Some(Duration::from_secs(5)));
        let started = tokio::time::Instant::now();
        connect(&connector, "slow").await;
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    // -----------------------------------------------------------------------
    // Documents
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn data_is_shared_across_connections() {
        let connector = MemoryConnector::new();
        let server = connector.server("primary");

        let writer = connect(&connector, "primary").await;
        let db = writer.database("db").unwrap();
        let id = db
            .insert_one("fs.files", Document::new().with("filename", "a.txt"))
            .await
            .unwrap();
        writer.close().await.unwrap();

        let reader = connect(&connector, "primary").await;
        let found = reader
            .database("db")
            .unwrap()
            .find_one("fs.files", &Filter::eq("filename", "a.txt"))
            .await
            .unwrap()
            .expect("should exist");
        assert_eq!(found.id(), Some(id));
        assert_eq!(server.document_count("db", "fs.files"), 1);
    }

    #[tokio::test]
    async fn databases_are_isolated() {
        let connector = MemoryConnector::new();
        connector.server("primary");
        let conn = connect(&connector, "primary").await;
        conn.database("one")
            .unwrap()
            .insert_one("c", Document::new().with("k", "v"))
            .await
            .unwrap();
        let other = conn
            .database("two")
            .unwrap()
            .find_one("c", &Filter::eq("k", "v"))
            .await
            .unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn find_returns_matches_in_insertion_order() {
        let connector = MemoryConnector::new();
        connector.server("primary");
        let db = connect(&connector, "primary").await.database("db").unwrap();
        for n in 0..5u64 {
            let group = if n % 2 == 0 { "even" } else { "odd" };
            db.insert_one("c", Document::new().with("group", group).with("n", n))
                .await
                .unwrap();
        }
        let evens = db.find("c", &Filter::eq("group", "even")).await.unwrap();
        let ns: Vec<u64> = evens.iter().map(|d| d.get_u64("n").unwrap()).collect();
        assert_eq!(ns, vec![0, 2, 4]);
        assert_eq!(db.count("c", &Filter::eq("group", "odd")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn insert_budget_rejects_after_limit() {
        let connector = MemoryConnector::new();
        let server = connector.server("primary");
        server.fail_inserts_after(Some(2));
        let db = connect(&connector, "primary").await.database("db").unwrap();

        db.insert_one("c", Document::new()).await.unwrap();
        db.insert_one("c", Document::new()).await.unwrap();
        let err = db.insert_one("c", Document::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::WriteRejected(_)));
        assert_eq!(server.document_count("db", "c"), 2);

        server.fail_inserts_after(None);
        db.insert_one("c", Document::new()).await.unwrap();
        assert_eq!(server.document_count("db", "c"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn insert_delay_is_applied() {
        let connector = MemoryConnector::new();
        connector
            .server("slow")
            .set_insert_delay(Some(Duration::from_millis(250)));
        let db = connect(&connector, "slow").await.database("db").unwrap();
        let started = tokio::time::Instant::now();
        db.insert_one("c", Document::new()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn find_delay_is_applied() {
        let connector = MemoryConnector::new();
        connector
            .server("slow")
            .set_find_delay(Some(Duration::from_millis(400)));
        let db = connect(&connector, "slow").await.database("db").unwrap();
        let started = tokio::time::Instant::now();
        assert!(db.find_one("c", &Filter::eq("k", "v")).await.unwrap().is_none());
        assert!(db.find("c", &Filter::eq("k", "v")).await.unwrap().is_empty());
        assert!(started.elapsed() >= Duration::from_millis(800));
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let connector = MemoryConnector::new();
        let server = connector.server("primary");
        let db = connect(&connector, "primary").await.database("db").unwrap();
        let id = uuid::Uuid::now_v7();

        db.insert_one("c", Document::new().with("_id", id)).await.unwrap();
        let err = db
            .insert_one("c", Document::new().with("_id", id).with("k", "v"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::WriteRejected(_)));
        assert_eq!(server.document_count("db", "c"), 1);

        // The same id is fine in another collection.
        db.insert_one("other", Document::new().with("_id", id)).await.unwrap();
    }

    #[tokio::test]
    async fn invalid_names_are_rejected() {
        let connector = MemoryConnector::new();
        connector.server("primary");
        let conn = connect(&connector, "primary").await;
        assert!(matches!(conn.database("a/b"), Err(StoreError::InvalidName { .. })));
        let db = conn.database("db").unwrap();
        let err = db.insert_one("", Document::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidName { .. }));
    }

    #[test]
    fn debug_format() {
        let server = MemoryServer::new("primary");
        let debug = format!("{server:?}");
        assert!(debug.contains("MemoryServer"));
        assert!(debug.contains("open_connections"));
    }
}
