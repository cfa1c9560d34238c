/// Errors from backing store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store behind a connection string could not be reached.
    #[error("backing store unreachable: {0}")]
    Unreachable(String),

    /// The connection string could not be parsed.
    #[error("invalid connection string {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },

    /// No driver is registered for the connection string's scheme.
    #[error("no driver registered for scheme {0:?}")]
    UnsupportedScheme(String),

    /// The connection was used after it was closed.
    #[error("connection closed")]
    Closed,

    /// A database or collection name is not usable by the driver.
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// A stored document is missing a field or has the wrong field type.
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// The store refused a write.
    #[error("write rejected: {0}")]
    WriteRejected(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
