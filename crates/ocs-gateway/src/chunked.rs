use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use ocs_store::{Database, Document, DocumentId, Filter, ID_FIELD};
use ocs_types::INLINE_THRESHOLD;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::collections::{CHUNKS, FILES};
use crate::error::{GatewayError, GatewayResult};
use crate::metadata::{FILENAME_FIELD, LENGTH_FIELD};

const FILES_ID_FIELD: &str = "files_id";
const CHUNK_INDEX_FIELD: &str = "n";
const CHUNK_DATA_FIELD: &str = "data";
const CHUNK_CRC_FIELD: &str = "crc32";
const CHUNK_SIZE_FIELD: &str = "chunkSize";
const UPLOAD_DATE_FIELD: &str = "uploadDate";

/// Upper bound on the buffer reserved up front for a chunked read.
const MAX_PREALLOCATION: u64 = 2 * INLINE_THRESHOLD;

/// Chunked object storage built on plain document operations.
///
/// An object is a file document in `fs.files` plus `ceil(length / chunk_size)`
/// chunk documents in `fs.chunks`:
///
/// ```text
/// fs.files:  { _id, filename, length, chunkSize, uploadDate }
/// fs.chunks: { _id, files_id, n, data, crc32 }
/// ```
///
/// Chunks are written first and the file document last, so an object only
/// becomes visible to readers once every chunk is stored. A failed upload
/// leaves its chunks behind without a file document.
pub struct Bucket {
    db: Arc<dyn Database>,
    chunk_size: usize,
}

impl Bucket {
    pub fn new(db: Arc<dyn Database>, chunk_size: usize) -> Self {
        Self {
            db,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Start a new object named `name`.
    pub fn open_upload_stream(&self, name: &str) -> UploadStream {
        UploadStream {
            db: Arc::clone(&self.db),
            files_id: Uuid::now_v7(),
            filename: name.to_string(),
            chunk_size: self.chunk_size,
            pending: BytesMut::with_capacity(self.chunk_size),
            next_index: 0,
            length: 0,
            finished: false,
        }
    }

    /// Open the object named `name` for reading.
    pub async fn open_download_stream(&self, name: &str) -> GatewayResult<DownloadStream> {
        let file = self
            .db
            .find_one(FILES, &Filter::eq(FILENAME_FIELD, name))
            .await?
            .ok_or_else(|| GatewayError::not_found(self.db.name(), name))?;
        let files_id = file.get_uuid(ID_FIELD)?;
        let length = file.get_u64(LENGTH_FIELD)?;
        let chunk_size = file.get_u64(CHUNK_SIZE_FIELD)?;

        let mut chunks = self
            .db
            .find(CHUNKS, &Filter::eq(FILES_ID_FIELD, files_id))
            .await?;
        chunks.sort_by_key(|c| c.get(CHUNK_INDEX_FIELD).and_then(|n| n.as_u64()));

        Ok(DownloadStream {
            filename: name.to_string(),
            length,
            chunk_size,
            chunks: chunks.into(),
            next_index: 0,
            delivered: 0,
        })
    }
}

/// Write side of a chunked object.
///
/// Full chunks are stored as soon as they fill; only the unfilled tail is
/// held in memory.
pub struct UploadStream {
    db: Arc<dyn Database>,
    files_id: DocumentId,
    filename: String,
    chunk_size: usize,
    pending: BytesMut,
    next_index: u64,
    length: u64,
    finished: bool,
}

impl UploadStream {
    pub fn files_id(&self) -> DocumentId {
        self.files_id
    }

    /// Bytes accepted so far.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Chunk documents stored so far.
    pub fn chunks_written(&self) -> u64 {
        self.next_index
    }

    pub async fn write(&mut self, mut data: &[u8]) -> GatewayResult<()> {
        if self.finished {
            return Err(GatewayError::Transfer(format!(
                "{}: write after finish",
                self.filename
            )));
        }
        while !data.is_empty() {
            let room = self.chunk_size - self.pending.len();
            let take = room.min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            self.length += take as u64;
            data = &data[take..];
            if self.pending.len() == self.chunk_size {
                let chunk = self.pending.split().freeze();
                self.store_chunk(chunk).await?;
            }
        }
        Ok(())
    }

    /// Store the tail chunk and the file document. Returns the file id.
    pub async fn finish(&mut self) -> GatewayResult<DocumentId> {
        if self.finished {
            return Ok(self.files_id);
        }
        if !self.pending.is_empty() {
            let chunk = self.pending.split().freeze();
            self.store_chunk(chunk).await?;
        }
        let file = Document::new()
            .with(ID_FIELD, self.files_id)
            .with(FILENAME_FIELD, self.filename.as_str())
            .with(LENGTH_FIELD, self.length)
            .with(CHUNK_SIZE_FIELD, self.chunk_size as u64)
            .with(UPLOAD_DATE_FIELD, Utc::now());
        self.db
            .insert_one(FILES, file)
            .await
            .map_err(|e| self.transfer_error("file document", e))?;
        self.finished = true;
        debug!(
            db = self.db.name(),
            name = %self.filename,
            length = self.length,
            chunks = self.next_index,
            "chunked object finalized"
        );
        Ok(self.files_id)
    }

    async fn store_chunk(&mut self, data: Bytes) -> GatewayResult<()> {
        let n = self.next_index;
        let chunk = Document::new()
            .with(FILES_ID_FIELD, self.files_id)
            .with(CHUNK_INDEX_FIELD, n)
            .with(CHUNK_CRC_FIELD, crc32fast::hash(&data) as u64)
            .with(CHUNK_DATA_FIELD, data);
        self.db
            .insert_one(CHUNKS, chunk)
            .await
            .map_err(|e| self.transfer_error(&format!("chunk {n}"), e))?;
        self.next_index += 1;
        Ok(())
    }

    fn transfer_error(&self, what: &str, cause: impl std::fmt::Display) -> GatewayError {
        GatewayError::Transfer(format!("{}: storing {what} failed: {cause}", self.filename))
    }
}

/// Read side of a chunked object.
///
/// Chunks are checked for order, size, and CRC as they are handed out, and
/// the total is checked against the file document's length at the end.
pub struct DownloadStream {
    filename: String,
    length: u64,
    chunk_size: u64,
    chunks: VecDeque<Document>,
    next_index: u64,
    delivered: u64,
}

impl DownloadStream {
    /// Length recorded in the file document.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Next chunk, or `None` once the whole object has been delivered.
    pub async fn next_chunk(&mut self) -> GatewayResult<Option<Bytes>> {
        let Some(chunk) = self.chunks.pop_front() else {
            if self.delivered != self.length {
                return Err(self.corrupt(format!(
                    "expected {} bytes, chunks hold {}",
                    self.length, self.delivered
                )));
            }
            return Ok(None);
        };

        let n = chunk
            .get_u64(CHUNK_INDEX_FIELD)
            .map_err(|e| self.corrupt(e.to_string()))?;
        if n != self.next_index {
            return Err(self.corrupt(format!("expected chunk {}, found chunk {n}", self.next_index)));
        }
        let data = chunk
            .get_binary(CHUNK_DATA_FIELD)
            .map_err(|e| self.corrupt(e.to_string()))?
            .clone();
        if let Some(expected) = chunk.get(CHUNK_CRC_FIELD).and_then(|v| v.as_u64()) {
            if crc32fast::hash(&data) as u64 != expected {
                return Err(self.corrupt(format!("CRC mismatch in chunk {n}")));
            }
        }

        let remaining = self.length.saturating_sub(self.delivered);
        let expected_len = remaining.min(self.chunk_size);
        if data.len() as u64 != expected_len {
            return Err(self.corrupt(format!(
                "chunk {n} holds {} bytes, expected {expected_len}",
                data.len()
            )));
        }

        self.next_index += 1;
        self.delivered += data.len() as u64;
        Ok(Some(data))
    }

    fn corrupt(&self, reason: String) -> GatewayError {
        GatewayError::Transfer(format!("{}: {reason}", self.filename))
    }
}

/// Reads and writes whole objects through a [`Bucket`], bounded by an
/// optional transfer deadline.
pub struct ChunkedStore {
    bucket: Bucket,
    transfer_timeout: Option<Duration>,
}

impl ChunkedStore {
    pub fn new(db: Arc<dyn Database>, chunk_size: usize, transfer_timeout: Option<Duration>) -> Self {
        Self {
            bucket: Bucket::new(db, chunk_size),
            transfer_timeout,
        }
    }

    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    /// Copy `reader` into a new object named `name`. Returns the file id and
    /// the number of bytes stored.
    pub async fn write<R>(&self, name: &str, mut reader: R) -> GatewayResult<(DocumentId, u64)>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut upload = self.bucket.open_upload_stream(name);
        let mut buf = vec![0u8; self.bucket.chunk_size()];
        let outcome = with_deadline(self.transfer_timeout, name, async {
            loop {
                let n = reader
                    .read(&mut buf)
                    .await
                    .map_err(|e| GatewayError::Transfer(format!("{name}: reading payload failed: {e}")))?;
                if n == 0 {
                    break;
                }
                upload.write(&buf[..n]).await?;
            }
            upload.finish().await
        })
        .await;

        match outcome {
            Ok(id) => Ok((id, upload.length())),
            Err(e) => {
                if upload.chunks_written() > 0 {
                    warn!(
                        name,
                        files_id = %upload.files_id(),
                        chunks = upload.chunks_written(),
                        "chunked upload failed; stored chunks are orphaned"
                    );
                }
                Err(e)
            }
        }
    }

    /// Read the whole object named `name` into memory.
    pub async fn read(&self, name: &str) -> GatewayResult<Bytes> {
        with_deadline(self.transfer_timeout, name, async {
            let mut download = self.bucket.open_download_stream(name).await?;
            // The stored length is untrusted until the chunks confirm it.
            let capacity = download.length().min(MAX_PREALLOCATION);
            let mut out = BytesMut::with_capacity(capacity as usize);
            while let Some(chunk) = download.next_chunk().await? {
                out.extend_from_slice(&chunk);
            }
            Ok(out.freeze())
        })
        .await
    }
}

async fn with_deadline<T>(
    deadline: Option<Duration>,
    name: &str,
    transfer: impl Future<Output = GatewayResult<T>>,
) -> GatewayResult<T> {
    match deadline {
        None => transfer.await,
        Some(limit) => tokio::time::timeout(limit, transfer).await.unwrap_or_else(|_| {
            Err(GatewayError::Transfer(format!(
                "{name}: transfer exceeded {} ms",
                limit.as_millis()
            )))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocs_store::{Connection, ConnectionString, Connector, MemoryConnector, MemoryServer};

    async fn database() -> (Arc<dyn Database>, Arc<MemoryServer>) {
        let connector = MemoryConnector::new();
        let server = connector.server("primary");
        let conn: Arc<dyn Connection> = connector
            .connect(&ConnectionString::parse("mem://primary").unwrap())
            .await
            .unwrap();
        (conn.database("db").unwrap(), server)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    // -----------------------------------------------------------------------
    // Bucket streams
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn upload_stream_emits_full_chunks_eagerly() {
        let (db, server) = database().await;
        let bucket = Bucket::new(db, 4);
        let mut upload = bucket.open_upload_stream("obj");

        upload.write(b"abcdefghij").await.unwrap();
        assert_eq!(upload.chunks_written(), 2);
        assert_eq!(server.document_count("db", CHUNKS), 2);
        // Not visible until finished.
        assert_eq!(server.document_count("db", FILES), 0);

        upload.finish().await.unwrap();
        assert_eq!(upload.chunks_written(), 3);
        assert_eq!(upload.length(), 10);
        assert_eq!(server.document_count("db", FILES), 1);
    }

    #[tokio::test]
    async fn many_small_writes_fill_chunks() {
        let (db, server) = database().await;
        let bucket = Bucket::new(db, 3);
        let mut upload = bucket.open_upload_stream("obj");
        for byte in b"abcdefg" {
            upload.write(std::slice::from_ref(byte)).await.unwrap();
        }
        upload.finish().await.unwrap();
        assert_eq!(server.document_count("db", CHUNKS), 3);

        let mut download = bucket.open_download_stream("obj").await.unwrap();
        let mut sizes = Vec::new();
        while let Some(chunk) = download.next_chunk().await.unwrap() {
            sizes.push(chunk.len());
        }
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn write_after_finish_fails() {
        let (db, _) = database().await;
        let bucket = Bucket::new(db, 4);
        let mut upload = bucket.open_upload_stream("obj");
        let id = upload.finish().await.unwrap();
        assert_eq!(upload.finish().await.unwrap(), id);
        assert!(matches!(upload.write(b"x").await, Err(GatewayError::Transfer(_))));
    }

    #[tokio::test]
    async fn empty_object_has_no_chunks() {
        let (db, server) = database().await;
        let bucket = Bucket::new(db, 4);
        let mut upload = bucket.open_upload_stream("empty");
        upload.finish().await.unwrap();
        assert_eq!(server.document_count("db", CHUNKS), 0);

        let mut download = bucket.open_download_stream("empty").await.unwrap();
        assert_eq!(download.length(), 0);
        assert!(download.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn download_missing_is_not_found() {
        let (db, _) = database().await;
        let err = Bucket::new(db, 4).open_download_stream("nope").await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn missing_chunk_is_transfer_error() {
        let (db, _) = database().await;
        let files_id = Uuid::now_v7();
        db.insert_one(
            FILES,
            Document::new()
                .with(ID_FIELD, files_id)
                .with(FILENAME_FIELD, "gappy")
                .with(LENGTH_FIELD, 8u64)
                .with(CHUNK_SIZE_FIELD, 4u64),
        )
        .await
        .unwrap();
        // Chunk 0 is missing.
        db.insert_one(
            CHUNKS,
            Document::new()
                .with(FILES_ID_FIELD, files_id)
                .with(CHUNK_INDEX_FIELD, 1u64)
                .with(CHUNK_DATA_FIELD, Bytes::from_static(b"efgh")),
        )
        .await
        .unwrap();

        let mut download = Bucket::new(db, 4).open_download_stream("gappy").await.unwrap();
        let err = download.next_chunk().await.unwrap_err();
        assert!(matches!(err, GatewayError::Transfer(ref m) if m.contains("expected chunk 0")));
    }

    #[tokio::test]
    async fn truncated_object_is_transfer_error() {
        let (db, _) = database().await;
        let files_id = Uuid::now_v7();
        db.insert_one(
            FILES,
            Document::new()
                .with(ID_FIELD, files_id)
                .with(FILENAME_FIELD, "short")
                .with(LENGTH_FIELD, 8u64)
                .with(CHUNK_SIZE_FIELD, 4u64),
        )
        .await
        .unwrap();
        db.insert_one(
            CHUNKS,
            Document::new()
                .with(FILES_ID_FIELD, files_id)
                .with(CHUNK_INDEX_FIELD, 0u64)
                .with(CHUNK_DATA_FIELD, Bytes::from_static(b"abcd")),
        )
        .await
        .unwrap();

        let mut download = Bucket::new(db, 4).open_download_stream("short").await.unwrap();
        assert_eq!(download.next_chunk().await.unwrap().unwrap().as_ref(), b"abcd");
        let err = download.next_chunk().await.unwrap_err();
        assert!(matches!(err, GatewayError::Transfer(ref m) if m.contains("expected 8 bytes")));
    }

    #[tokio::test]
    async fn crc_mismatch_is_transfer_error() {
        let (db, _) = database().await;
        let files_id = Uuid::now_v7();
        db.insert_one(
            FILES,
            Document::new()
                .with(ID_FIELD, files_id)
                .with(FILENAME_FIELD, "flipped")
                .with(LENGTH_FIELD, 4u64)
                .with(CHUNK_SIZE_FIELD, 4u64),
        )
        .await
        .unwrap();
        db.insert_one(
            CHUNKS,
            Document::new()
                .with(FILES_ID_FIELD, files_id)
                .with(CHUNK_INDEX_FIELD, 0u64)
                .with(CHUNK_CRC_FIELD, crc32fast::hash(b"abcd") as u64)
                .with(CHUNK_DATA_FIELD, Bytes::from_static(b"abce")),
        )
        .await
        .unwrap();

        let mut download = Bucket::new(db, 4).open_download_stream("flipped").await.unwrap();
        let err = download.next_chunk().await.unwrap_err();
        assert!(matches!(err, GatewayError::Transfer(ref m) if m.contains("CRC")));
    }

    // -----------------------------------------------------------------------
    // ChunkedStore
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn roundtrip_through_reader() {
        let (db, server) = database().await;
        let store = ChunkedStore::new(db, 1000, None);
        let payload = pattern(10_500);

        let (_, length) = store.write("obj", &payload[..]).await.unwrap();
        assert_eq!(length, 10_500);
        assert_eq!(server.document_count("db", CHUNKS), 11);

        let data = store.read("obj").await.unwrap();
        assert_eq!(data.as_ref(), payload.as_slice());
    }

    #[tokio::test]
    async fn exact_multiple_of_chunk_size() {
        let (db, server) = database().await;
        let store = ChunkedStore::new(db, 256, None);
        let payload = pattern(1024);
        store.write("obj", &payload[..]).await.unwrap();
        assert_eq!(server.document_count("db", CHUNKS), 4);
        assert_eq!(store.read("obj").await.unwrap().as_ref(), payload.as_slice());
    }

    #[tokio::test]
    async fn failed_upload_is_invisible_and_orphans_chunks() {
        let (db, server) = database().await;
        server.fail_inserts_after(Some(2));
        let store = ChunkedStore::new(db, 4, None);

        let err = store.write("obj", &b"abcdefghijkl"[..]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transfer(ref m) if m.contains("chunk 2")));
        assert_eq!(server.document_count("db", CHUNKS), 2);
        assert_eq!(server.document_count("db", FILES), 0);

        server.fail_inserts_after(None);
        assert!(store.read("obj").await.unwrap_err().is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_lookup_hits_read_deadline() {
        let (db, server) = database().await;
        let store = ChunkedStore::new(db, 4, Some(Duration::from_millis(1500)));
        store.write("obj", &b"abcdefgh"[..]).await.unwrap();

        server.set_find_delay(Some(Duration::from_secs(3600)));
        let started = tokio::time::Instant::now();
        let err = store.read("obj").await.unwrap_err();
        assert!(matches!(err, GatewayError::Transfer(ref m) if m.contains("exceeded 1500 ms")));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn absurd_stored_length_is_transfer_error() {
        let (db, _) = database().await;
        db.insert_one(
            FILES,
            Document::new()
                .with(ID_FIELD, Uuid::now_v7())
                .with(FILENAME_FIELD, "huge")
                .with(LENGTH_FIELD, u64::MAX)
                .with(CHUNK_SIZE_FIELD, 4u64),
        )
        .await
        .unwrap();

        let err = ChunkedStore::new(db, 4, None).read("huge").await.unwrap_err();
        assert!(matches!(err, GatewayError::Transfer(ref m) if m.contains("expected")));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_transfer_hits_deadline() {
        let (db, server) = database().await;
        server.set_insert_delay(Some(Duration::from_secs(1)));
        let store = ChunkedStore::new(db, 4, Some(Duration::from_millis(1500)));

        let err = store.write("obj", &b"abcdefghijkl"[..]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transfer(ref m) if m.contains("exceeded 1500 ms")));
    }
}
