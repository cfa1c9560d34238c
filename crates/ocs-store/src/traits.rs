use std::sync::Arc;

use async_trait::async_trait;

use crate::document::{Document, DocumentId, Filter, ID_FIELD};
use crate::error::{StoreError, StoreResult};
use crate::uri::ConnectionString;

/// Opens connections to one kind of backing store.
///
/// A connector is selected by the scheme of a connection string (see
/// [`crate::DriverRegistry`]). Implementations must not block the runtime;
/// the caller bounds `connect` with its own timeout.
#[async_trait]
pub trait Connector: Send + Sync {
    /// URI scheme this connector serves, e.g. `"mem"` or `"fs"`.
    fn scheme(&self) -> &'static str;

    /// Open a new connection.
    ///
    /// Returns [`crate::StoreError::Unreachable`] when nothing answers at the
    /// target.
    async fn connect(&self, uri: &ConnectionString) -> StoreResult<Arc<dyn Connection>>;
}

/// A live connection to a backing store.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Handle to a database (namespace). Databases are created lazily on
    /// first write.
    fn database(&self, name: &str) -> StoreResult<Arc<dyn Database>>;

    /// Close the connection. Further use fails with
    /// [`crate::StoreError::Closed`]. Closing twice is a no-op.
    async fn close(&self) -> StoreResult<()>;

    fn is_closed(&self) -> bool;
}

/// Document operations on one database.
///
/// Collections are created lazily on first insert. Documents without an
/// `_id` field are assigned a fresh UUID v7.
#[async_trait]
pub trait Database: Send + Sync {
    fn name(&self) -> &str;

    /// Insert a document and return its `_id`.
    async fn insert_one(&self, collection: &str, document: Document) -> StoreResult<DocumentId>;

    /// First matching document in insertion order, or `None`.
    async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Document>>;

    /// All matching documents in insertion order.
    async fn find(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>>;

    /// Number of matching documents.
    ///
    /// Default implementation counts the result of `find()`.
    async fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        Ok(self.find(collection, filter).await?.len() as u64)
    }
}

/// Assign an `_id` to `document` if it has none, returning the id.
pub(crate) fn ensure_id(document: &mut Document) -> StoreResult<DocumentId> {
    if let Some(id) = document.id() {
        return Ok(id);
    }
    if document.contains_key(ID_FIELD) {
        return Err(StoreError::MalformedDocument(format!(
            "field {ID_FIELD:?} must be a UUID"
        )));
    }
    let id = uuid::Uuid::now_v7();
    document.insert(ID_FIELD, id);
    Ok(id)
}

/// Reject database and collection names a driver cannot map safely.
pub(crate) fn validate_name(name: &str) -> StoreResult<()> {
    let invalid = |reason: &str| StoreError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() {
        return Err(invalid("empty"));
    }
    if name == "." || name == ".." {
        return Err(invalid("reserved"));
    }
    if name.chars().any(|c| c == '/' || c == '\\' || c == '\0') {
        return Err(invalid("contains a path separator or NUL"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_id_assigns_once() {
        let mut doc = Document::new().with("filename", "a");
        let id = ensure_id(&mut doc).unwrap();
        assert_eq!(doc.id(), Some(id));
        assert_eq!(ensure_id(&mut doc).unwrap(), id);
    }

    #[test]
    fn ensure_id_rejects_non_uuid_id() {
        let mut doc = Document::new().with(ID_FIELD, "not-a-uuid");
        assert!(matches!(ensure_id(&mut doc), Err(StoreError::MalformedDocument(_))));
    }

    #[test]
    fn names() {
        assert!(validate_name("fs.files").is_ok());
        assert!(validate_name("tenant-01").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
    }
}
