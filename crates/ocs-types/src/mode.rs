use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Storage backend selected by the caller for an object.
///
/// The mode names a *backend*; for the document backend the payload length
/// then picks the strategy within it (see [`crate::Strategy`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageMode {
    /// Document store; small payloads inline, large payloads chunked.
    InlineDocumentStore,
    /// Document store, always through the chunked bucket.
    ChunkedStreamStore,
    /// Insert a pre-built structured document verbatim.
    RawDocumentInsert,
    /// Content-addressed distributed storage. Not implemented.
    DistributedStore,
}

impl StorageMode {
    /// All modes, in declaration order.
    pub const ALL: [StorageMode; 4] = [
        Self::InlineDocumentStore,
        Self::ChunkedStreamStore,
        Self::RawDocumentInsert,
        Self::DistributedStore,
    ];

    /// Key handed to the endpoint resolver when acquiring a connection.
    pub fn routing_key(&self) -> &'static str {
        match self {
            Self::InlineDocumentStore => "inline-document-store",
            Self::ChunkedStreamStore => "chunked-stream-store",
            Self::RawDocumentInsert => "raw-document-insert",
            Self::DistributedStore => "distributed-store",
        }
    }

    /// Whether a backend exists for this mode.
    pub fn is_implemented(&self) -> bool {
        !matches!(self, Self::DistributedStore)
    }

    /// Whether objects stored under this mode carry a downloadable payload.
    pub fn carries_payload(&self) -> bool {
        matches!(self, Self::InlineDocumentStore | Self::ChunkedStreamStore)
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.routing_key())
    }
}

impl FromStr for StorageMode {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline-document-store" | "inline" | "document" => Ok(Self::InlineDocumentStore),
            "chunked-stream-store" | "chunked" | "stream" => Ok(Self::ChunkedStreamStore),
            "raw-document-insert" | "raw" => Ok(Self::RawDocumentInsert),
            "distributed-store" | "distributed" => Ok(Self::DistributedStore),
            _ => Err(TypeError::UnknownMode(s.to_string())),
        }
    }
}
