use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::document::{Document, DocumentId, Filter, Value};
use crate::error::{StoreError, StoreResult};
use crate::traits::{ensure_id, validate_name, Connection, Connector, Database};
use crate::uri::ConnectionString;

const DOCUMENT_EXTENSION: &str = "doc";
const INDEX_EXTENSION: &str = "idx";

/// Connector for `fs://<directory>` connection strings.
///
/// Layout under the root directory:
///
/// ```text
/// <root>/<database>/<collection>/<seq>-<_id>.doc   full document
/// <root>/<database>/<collection>/<seq>-<_id>.idx   document minus binary fields
/// ```
///
/// `seq` is a zero-padded per-collection insertion counter, so listing order
/// is insertion order whatever the `_id`. Queries filter on the small index
/// entries and only decode the full documents that match. Both files are
/// written to a temporary name and renamed into place, the index entry
/// last; a document is visible once its index entry exists.
#[derive(Clone, Debug, Default)]
pub struct FsConnector;

impl FsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for FsConnector {
    fn scheme(&self) -> &'static str {
        "fs"
    }

    async fn connect(&self, uri: &ConnectionString) -> StoreResult<Arc<dyn Connection>> {
        let root = PathBuf::from(uri.target());
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::Unreachable(format!("{uri}: {e}")))?;
        let meta = tokio::fs::metadata(&root)
            .await
            .map_err(|e| StoreError::Unreachable(format!("{uri}: {e}")))?;
        if !meta.is_dir() {
            return Err(StoreError::Unreachable(format!("{uri}: not a directory")));
        }
        debug!(root = %root.display(), "fs connection opened");
        Ok(Arc::new(FsConnection {
            root,
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct FsConnection {
    root: PathBuf,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for FsConnection {
    fn database(&self, name: &str) -> StoreResult<Arc<dyn Database>> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        validate_name(name)?;
        Ok(Arc::new(FsDatabase {
            dir: self.root.join(name),
            name: name.to_string(),
            closed: Arc::clone(&self.closed),
        }))
    }

    async fn close(&self) -> StoreResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(root = %self.root.display(), "fs connection closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct FsDatabase {
    dir: PathBuf,
    name: String,
    closed: Arc<AtomicBool>,
}

/// One stored document, as named on disk.
#[derive(Debug)]
struct Entry {
    seq: u64,
    id: DocumentId,
}

impl Entry {
    fn parse(path: &Path) -> Option<Self> {
        if path.extension()? != INDEX_EXTENSION {
            return None;
        }
        let (seq, id) = path.file_stem()?.to_str()?.split_once('-')?;
        Some(Self {
            seq: seq.parse().ok()?,
            id: DocumentId::parse_str(id).ok()?,
        })
    }

    fn stem(&self) -> String {
        format!("{:020}-{}", self.seq, self.id.simple())
    }

    fn path(&self, dir: &Path, extension: &str) -> PathBuf {
        dir.join(format!("{}.{extension}", self.stem()))
    }
}

/// `document` without its top-level binary fields.
fn index_entry(document: &Document) -> Document {
    document
        .iter()
        .filter(|(_, value)| !matches!(value, Value::Binary(_)))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

async fn write_atomic(dir: &Path, target: &Path, data: &[u8]) -> StoreResult<()> {
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{name}.tmp"));
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, target).await?;
    Ok(())
}

impl FsDatabase {
    fn collection_dir(&self, collection: &str) -> StoreResult<PathBuf> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        validate_name(collection)?;
        Ok(self.dir.join(collection))
    }

    /// Visible documents of a collection, in insertion order.
    async fn entries(dir: &Path) -> StoreResult<Vec<Entry>> {
        let mut listing = match tokio::fs::read_dir(dir).await {
            Ok(listing) => listing,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut entries = Vec::new();
        while let Some(item) = listing.next_entry().await? {
            if let Some(entry) = Entry::parse(&item.path()) {
                entries.push(entry);
            }
        }
        entries.sort_by_key(|e| (e.seq, e.id));
        Ok(entries)
    }

    async fn scan(&self, collection: &str, filter: &Filter, limit: Option<usize>) -> StoreResult<Vec<Document>> {
        let dir = self.collection_dir(collection)?;
        // Binary values are absent from index entries.
        let needs_body = matches!(filter.value(), Value::Binary(_));
        let mut matches = Vec::new();
        for entry in Self::entries(&dir).await? {
            if !needs_body {
                let head = Document::from_bytes(&tokio::fs::read(entry.path(&dir, INDEX_EXTENSION)).await?)?;
                if !filter.matches(&head) {
                    continue;
                }
            }
            let document = Document::from_bytes(&tokio::fs::read(entry.path(&dir, DOCUMENT_EXTENSION)).await?)?;
            if needs_body && !filter.matches(&document) {
                continue;
            }
            matches.push(document);
            if limit.is_some_and(|l| matches.len() >= l) {
                break;
            }
        }
        Ok(matches)
    }
}

#[async_trait]
impl Database for FsDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert_one(&self, collection: &str, mut document: Document) -> StoreResult<DocumentId> {
        let dir = self.collection_dir(collection)?;
        let id = ensure_id(&mut document)?;
        tokio::fs::create_dir_all(&dir).await?;

        let existing = Self::entries(&dir).await?;
        if existing.iter().any(|e| e.id == id) {
            return Err(StoreError::WriteRejected(format!("duplicate _id {id}")));
        }
        let entry = Entry {
            seq: existing.last().map_or(0, |e| e.seq + 1),
            id,
        };
        write_atomic(&dir, &entry.path(&dir, DOCUMENT_EXTENSION), &document.to_bytes()?).await?;
        write_atomic(&dir, &entry.path(&dir, INDEX_EXTENSION), &index_entry(&document).to_bytes()?).await?;
        debug!(db = %self.name, collection, seq = entry.seq, %id, "fs document written");
        Ok(id)
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Document>> {
        Ok(self.scan(collection, filter, Some(1)).await?.into_iter().next())
    }

    async fn find(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>> {
        self.scan(collection, filter, None).await
    }
}
