use std::sync::Arc;

use bytes::Bytes;
use ocs_store::{Database, Document, DocumentId, Filter, StoreError};
use tracing::debug;

use crate::collections::FILES;
use crate::error::{GatewayError, GatewayResult};
use crate::metadata::{FILENAME_FIELD, LENGTH_FIELD};

const DATA_FIELD: &str = "data";

/// Stores small payloads as a single document with an embedded binary field:
///
/// ```text
/// fs.files: { _id, filename, length, data }
/// ```
///
/// The store does no size checks; the router decides which payloads land
/// here.
pub struct InlineStore {
    db: Arc<dyn Database>,
}

impl InlineStore {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    pub async fn write(&self, name: &str, payload: Bytes) -> GatewayResult<DocumentId> {
        let length = payload.len() as u64;
        let document = Document::new()
            .with(FILENAME_FIELD, name)
            .with(LENGTH_FIELD, length)
            .with(DATA_FIELD, payload);
        let id = self.db.insert_one(FILES, document).await?;
        debug!(db = self.db.name(), name, length, %id, "inline document written");
        Ok(id)
    }

    pub async fn read(&self, name: &str) -> GatewayResult<Bytes> {
        let document = self
            .db
            .find_one(FILES, &Filter::eq(FILENAME_FIELD, name))
            .await?
            .ok_or_else(|| GatewayError::not_found(self.db.name(), name))?;

        let data = document.get_binary(DATA_FIELD)?.clone();
        let length = document.get_u64(LENGTH_FIELD)?;
        if data.len() as u64 != length {
            return Err(StoreError::MalformedDocument(format!(
                "{name}: length field says {length} bytes, data holds {}",
                data.len()
            ))
            .into());
        }
        debug!(db = self.db.name(), name, length, "inline document read");
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::find_metadata;
    use ocs_store::{Connection, ConnectionString, Connector, MemoryConnector};

    async fn database() -> Arc<dyn Database> {
        let connector = MemoryConnector::new();
        connector.server("primary");
        let conn: Arc<dyn Connection> = connector
            .connect(&ConnectionString::parse("mem://primary").unwrap())
            .await
            .unwrap();
        conn.database("db").unwrap()
    }

    #[tokio::test]
    async fn write_then_read() {
        let store = InlineStore::new(database().await);
        store.write("a.txt", Bytes::from_static(b"0123456789")).await.unwrap();
        let data = store.read("a.txt").await.unwrap();
        assert_eq!(data.as_ref(), b"0123456789");
    }

    #[tokio::test]
    async fn empty_payload() {
        let store = InlineStore::new(database().await);
        store.write("empty", Bytes::new()).await.unwrap();
        assert!(store.read("empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_missing_is_not_found() {
        let store = InlineStore::new(database().await);
        let err = store.read("nope").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound { ref namespace, ref name } if namespace == "db" && name == "nope"));
    }

    #[tokio::test]
    async fn written_document_carries_metadata() {
        let db = database().await;
        InlineStore::new(Arc::clone(&db))
            .write("a.txt", Bytes::from_static(b"abc"))
            .await
            .unwrap();
        let meta = find_metadata(&*db, "a.txt").await.unwrap().expect("should exist");
        assert_eq!(meta.name, "a.txt");
        assert_eq!(meta.length, 3);
        assert!(find_metadata(&*db, "b.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn document_without_data_is_malformed() {
        let db = database().await;
        db.insert_one(
            FILES,
            Document::new().with(FILENAME_FIELD, "meta-only").with(LENGTH_FIELD, 5u64),
        )
        .await
        .unwrap();
        let err = InlineStore::new(db).read("meta-only").await.unwrap_err();
        assert!(matches!(err, GatewayError::Store(StoreError::MalformedDocument(_))));
    }

    #[tokio::test]
    async fn length_mismatch_is_malformed() {
        let db = database().await;
        db.insert_one(
            FILES,
            Document::new()
                .with(FILENAME_FIELD, "liar")
                .with(LENGTH_FIELD, 99u64)
                .with(DATA_FIELD, Bytes::from_static(b"short")),
        )
        .await
        .unwrap();
        let err = InlineStore::new(db).read("liar").await.unwrap_err();
        assert!(matches!(err, GatewayError::Store(StoreError::MalformedDocument(_))));
    }

    #[tokio::test]
    async fn duplicate_names_are_not_deduplicated_by_the_store() {
        let db = database().await;
        let store = InlineStore::new(Arc::clone(&db));
        store.write("dup", Bytes::from_static(b"first")).await.unwrap();
        store.write("dup", Bytes::from_static(b"second")).await.unwrap();
        assert_eq!(db.count(FILES, &Filter::eq(FILENAME_FIELD, "dup")).await.unwrap(), 2);
        // Reads return the oldest document.
        assert_eq!(store.read("dup").await.unwrap().as_ref(), b"first");
    }
}
