use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use ocs_types::RawDocument;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// Identifier assigned to every stored document (`_id`).
pub type DocumentId = Uuid;

/// Field holding a document's identifier.
pub const ID_FIELD: &str = "_id";

/// A field value inside a [`Document`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Binary(Bytes),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    Array(Vec<Value>),
    Document(Document),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Unsigned view of an integer value. Negative integers yield `None`.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt(n) => Some(*n),
            Self::Int(n) => u64::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Self::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(id) => Some(*id),
            _ => None,
        }
    }

    /// Convert to JSON. Binary fields become arrays of byte values.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(n) => Json::from(*n),
            Self::UInt(n) => Json::from(*n),
            Self::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
            Self::String(s) => Json::String(s.clone()),
            Self::Binary(b) => Json::Array(b.iter().map(|byte| Json::from(*byte)).collect()),
            Self::Uuid(id) => Json::String(id.to_string()),
            Self::DateTime(t) => Json::String(t.to_rfc3339()),
            Self::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Self::Document(doc) => Json::Object(doc.to_json()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::UInt(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Self::Binary(b)
    }
}

impl From<Uuid> for Value {
    fn from(id: Uuid) -> Self {
        Self::Uuid(id)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Self::DateTime(t)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Self::Document(doc)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Self::UInt(u)
                } else if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or_default())
                }
            }
            Json::String(s) => Self::String(s),
            Json::Array(items) => Self::Array(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => Self::Document(Document::from(map)),
        }
    }
}

/// An ordered map of field names to values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: BTreeMap<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a field, returning the previous value if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// The document's `_id`, if it has a UUID one.
    pub fn id(&self) -> Option<DocumentId> {
        self.get(ID_FIELD).and_then(Value::as_uuid)
    }

    /// Required string field.
    pub fn get_str(&self, key: &str) -> StoreResult<&str> {
        self.get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| missing(key, "string"))
    }

    /// Required unsigned integer field.
    pub fn get_u64(&self, key: &str) -> StoreResult<u64> {
        self.get(key)
            .and_then(Value::as_u64)
            .ok_or_else(|| missing(key, "unsigned integer"))
    }

    /// Required binary field.
    pub fn get_binary(&self, key: &str) -> StoreResult<&Bytes> {
        self.get(key)
            .and_then(Value::as_binary)
            .ok_or_else(|| missing(key, "binary"))
    }

    /// Required UUID field.
    pub fn get_uuid(&self, key: &str) -> StoreResult<Uuid> {
        self.get(key)
            .and_then(Value::as_uuid)
            .ok_or_else(|| missing(key, "uuid"))
    }

    pub fn to_json(&self) -> serde_json::Map<String, serde_json::Value> {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }

    /// Encode for on-disk storage.
    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Decode from on-disk storage.
    pub fn from_bytes(data: &[u8]) -> StoreResult<Self> {
        bincode::deserialize(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

fn missing(key: &str, expected: &str) -> StoreError {
    StoreError::MalformedDocument(format!("field {key:?} missing or not {expected}"))
}

impl From<RawDocument> for Document {
    fn from(map: RawDocument) -> Self {
        Self {
            fields: map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
        }
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Equality filter over a single field.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    field: String,
    value: Value,
}

impl Filter {
    /// Match documents whose `field` equals `value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn matches(&self, document: &Document) -> bool {
        match (document.get(&self.field), &self.value) {
            (Some(actual), expected) if actual == expected => true,
            // Integers compare by value regardless of signedness.
            (Some(actual), expected) => match (actual.as_u64(), expected.as_u64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
            (None, _) => false,
        }
    }
}
