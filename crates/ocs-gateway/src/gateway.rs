use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ocs_store::{Database, Document, DocumentId, DriverRegistry, Value, ID_FIELD};
use ocs_types::{ObjectRecord, RawDocument, StorageMode, StoredMetadata, Strategy};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::chunked::ChunkedStore;
use crate::collections::FILES;
use crate::config::GatewayConfig;
use crate::connection::{ConnectionManager, ConnectionStats};
use crate::error::{GatewayError, GatewayResult};
use crate::inline::InlineStore;
use crate::metadata::{find_metadata, name_in_use};
use crate::resolver::{EndpointResolver, StaticResolver};
use crate::router::{route, route_download};

/// Outcome of a successful upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UploadReceipt {
    pub namespace: String,
    pub name: String,
    /// Payload bytes stored. Zero for raw inserts.
    pub length: u64,
    pub strategy: Strategy,
    /// `_id` of the document that makes the object visible: the inline
    /// document, the chunked file document, or the raw document.
    pub id: DocumentId,
}

/// Entry point for storing and retrieving objects.
///
/// The gateway holds no connections between calls. Each call acquires one
/// lease from its [`ConnectionManager`] and releases it before returning.
/// Share it across tasks with `Arc<Gateway>`.
pub struct Gateway {
    connections: ConnectionManager,
    chunk_size: usize,
    transfer_timeout: Option<Duration>,
}

impl Gateway {
    pub fn new(
        config: &GatewayConfig,
        resolver: Arc<dyn EndpointResolver>,
        drivers: Arc<DriverRegistry>,
    ) -> GatewayResult<Self> {
        config.validate()?;
        Ok(Self {
            connections: ConnectionManager::new(resolver, drivers, config.connect_timeout()),
            chunk_size: config.chunk_size,
            transfer_timeout: config.transfer_timeout(),
        })
    }

    /// Gateway resolving endpoints from the config's `[endpoints]` table.
    pub fn from_config(config: &GatewayConfig, drivers: Arc<DriverRegistry>) -> GatewayResult<Self> {
        Self::new(config, Arc::new(StaticResolver::from_config(config)), drivers)
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn stats(&self) -> ConnectionStats {
        self.connections.stats()
    }

    /// Store `record` according to its mode.
    ///
    /// Payload modes route on payload length and reject a name that already
    /// exists in the namespace. Raw inserts store `raw_document` as given.
    #[instrument(skip_all, fields(namespace = %record.namespace, name = %record.name, mode = %record.mode))]
    pub async fn upload(&self, record: &ObjectRecord) -> GatewayResult<UploadReceipt> {
        let mode = record.mode;
        let receipt = match mode {
            StorageMode::InlineDocumentStore | StorageMode::ChunkedStreamStore => {
                require_name(record)?;
                let payload = record.payload.clone().ok_or_else(|| {
                    GatewayError::InvalidRecord(format!("{mode} upload requires a payload"))
                })?;
                let strategy = route(mode, payload.len() as u64)?;
                let (id, length) = self
                    .connections
                    .scoped(mode.routing_key(), &record.namespace, |db| {
                        self.write_payload(db, &record.name, payload, strategy)
                    })
                    .await?;
                UploadReceipt {
                    namespace: record.namespace.clone(),
                    name: record.name.clone(),
                    length,
                    strategy,
                    id,
                }
            }
            StorageMode::RawDocumentInsert => {
                let raw = record.raw_document.clone().ok_or_else(|| {
                    GatewayError::InvalidRecord(format!("{mode} requires a raw document"))
                })?;
                let document = raw_to_document(raw)?;
                let id = self
                    .connections
                    .scoped(mode.routing_key(), &record.namespace, |db| insert_raw(db, document))
                    .await?;
                UploadReceipt {
                    namespace: record.namespace.clone(),
                    name: record.name.clone(),
                    length: 0,
                    strategy: Strategy::Raw,
                    id,
                }
            }
            StorageMode::DistributedStore => return Err(GatewayError::NotImplemented(mode)),
        };
        info!(length = receipt.length, strategy = %receipt.strategy, id = %receipt.id, "upload complete");
        Ok(receipt)
    }

    /// Fetch the payload of the object named by `record`.
    #[instrument(skip_all, fields(namespace = %record.namespace, name = %record.name, mode = %record.mode))]
    pub async fn download(&self, record: &ObjectRecord) -> GatewayResult<Bytes> {
        let mode = record.mode;
        match mode {
            StorageMode::InlineDocumentStore | StorageMode::ChunkedStreamStore => {}
            StorageMode::RawDocumentInsert => {
                return Err(GatewayError::InvalidRecord(
                    "raw documents carry no payload to download".into(),
                ))
            }
            StorageMode::DistributedStore => return Err(GatewayError::NotImplemented(mode)),
        }
        require_name(record)?;

        let data = self
            .connections
            .scoped(mode.routing_key(), &record.namespace, |db| {
                self.read_payload(db, mode, &record.name)
            })
            .await?;
        info!(length = data.len(), "download complete");
        Ok(data)
    }

    /// Look up the stored name and length without reading the payload.
    #[instrument(skip_all, fields(namespace = %record.namespace, name = %record.name, mode = %record.mode))]
    pub async fn stat(&self, record: &ObjectRecord) -> GatewayResult<StoredMetadata> {
        let mode = record.mode;
        if mode == StorageMode::DistributedStore {
            return Err(GatewayError::NotImplemented(mode));
        }
        require_name(record)?;
        self.connections
            .scoped(mode.routing_key(), &record.namespace, |db| async move {
                find_metadata(&*db, &record.name)
                    .await?
                    .ok_or_else(|| GatewayError::not_found(db.name(), &record.name))
            })
            .await
    }

    async fn write_payload(
        &self,
        db: Arc<dyn Database>,
        name: &str,
        payload: Bytes,
        strategy: Strategy,
    ) -> GatewayResult<(DocumentId, u64)> {
        if name_in_use(&*db, name).await? {
            return Err(GatewayError::AlreadyExists {
                namespace: db.name().to_string(),
                name: name.to_string(),
            });
        }
        let length = payload.len() as u64;
        match strategy {
            Strategy::Inline => Ok((InlineStore::new(db).write(name, payload).await?, length)),
            Strategy::Chunked => {
                ChunkedStore::new(db, self.chunk_size, self.transfer_timeout)
                    .write(name, &payload[..])
                    .await
            }
            Strategy::Raw => Err(GatewayError::InvalidRecord(
                "raw strategy has no payload writer".into(),
            )),
        }
    }

    async fn read_payload(&self, db: Arc<dyn Database>, mode: StorageMode, name: &str) -> GatewayResult<Bytes> {
        let metadata = find_metadata(&*db, name)
            .await?
            .ok_or_else(|| GatewayError::not_found(db.name(), name))?;
        match route_download(mode, metadata.length)? {
            Strategy::Inline => InlineStore::new(db).read(name).await,
            Strategy::Chunked => {
                ChunkedStore::new(db, self.chunk_size, self.transfer_timeout)
                    .read(name)
                    .await
            }
            Strategy::Raw => Err(GatewayError::InvalidRecord(
                "raw documents carry no payload to download".into(),
            )),
        }
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("connections", &self.connections)
            .field("chunk_size", &self.chunk_size)
            .field("transfer_timeout", &self.transfer_timeout)
            .finish()
    }
}

fn require_name(record: &ObjectRecord) -> GatewayResult<()> {
    if record.name.is_empty() {
        return Err(GatewayError::InvalidRecord("object name is empty".into()));
    }
    Ok(())
}

/// Convert a caller document, accepting a UUID string as `_id`.
fn raw_to_document(raw: RawDocument) -> GatewayResult<Document> {
    let mut document = Document::from(raw);
    let id = match document.get(ID_FIELD) {
        Some(Value::String(s)) => Some(
            Uuid::parse_str(s).map_err(|e| GatewayError::InvalidRecord(format!("{ID_FIELD}: {e}")))?,
        ),
        _ => None,
    };
    if let Some(id) = id {
        document.insert(ID_FIELD, id);
    }
    Ok(document)
}

async fn insert_raw(db: Arc<dyn Database>, document: Document) -> GatewayResult<DocumentId> {
    Ok(db.insert_one(FILES, document).await?)
}
