use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::mode::StorageMode;

/// An arbitrary structured document supplied by the caller.
pub type RawDocument = serde_json::Map<String, serde_json::Value>;

/// The unit of work for one upload or download.
///
/// A record lives only for the duration of a call; only its payload and
/// metadata survive in the backing store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Payload bytes. Absent for lookups and raw inserts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Bytes>,
    /// Logical identifier, unique within `namespace`.
    pub name: String,
    /// Backend selection.
    pub mode: StorageMode,
    /// Database the object lives in.
    pub namespace: String,
    /// Document inserted verbatim by [`StorageMode::RawDocumentInsert`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_document: Option<RawDocument>,
}

impl ObjectRecord {
    /// A record carrying a payload to upload.
    pub fn upload(
        namespace: impl Into<String>,
        name: impl Into<String>,
        mode: StorageMode,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            payload: Some(payload.into()),
            name: name.into(),
            mode,
            namespace: namespace.into(),
            raw_document: None,
        }
    }

    /// A payload-free record naming an object to download or inspect.
    pub fn download(
        namespace: impl Into<String>,
        name: impl Into<String>,
        mode: StorageMode,
    ) -> Self {
        Self {
            payload: None,
            name: name.into(),
            mode,
            namespace: namespace.into(),
            raw_document: None,
        }
    }

    /// A record inserting `document` verbatim.
    ///
    /// The name is taken from the document's `filename` field when present.
    pub fn raw(namespace: impl Into<String>, document: RawDocument) -> Self {
        let name = document
            .get("filename")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Self {
            payload: None,
            name,
            mode: StorageMode::RawDocumentInsert,
            namespace: namespace.into(),
            raw_document: Some(document),
        }
    }

    /// Payload length in bytes, zero when absent.
    pub fn payload_len(&self) -> u64 {
        self.payload.as_ref().map_or(0, |p| p.len() as u64)
    }
}
