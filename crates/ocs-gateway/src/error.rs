use ocs_store::StoreError;
use ocs_types::StorageMode;
use thiserror::Error;

/// Errors returned by the gateway's upload and download paths.
///
/// Nothing here terminates the process; callers decide what is fatal.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Endpoint resolution or connection acquisition failed.
    #[error("connection error for {key:?}: {reason}")]
    Connection { key: String, reason: String },

    /// No object with this name exists in the namespace.
    #[error("object not found: {namespace}/{name}")]
    NotFound { namespace: String, name: String },

    /// The mode selects a backend with no implementation.
    #[error("storage mode not implemented: {0}")]
    NotImplemented(StorageMode),

    /// A chunked stream failed part-way through.
    #[error("transfer error: {0}")]
    Transfer(String),

    /// An object with this name already exists in the namespace.
    #[error("object already exists: {namespace}/{name}")]
    AlreadyExists { namespace: String, name: String },

    /// The record is missing something its mode requires.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl GatewayError {
    pub(crate) fn connection(key: &str, reason: impl ToString) -> Self {
        Self::Connection {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn not_found(namespace: &str, name: &str) -> Self {
        Self::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
