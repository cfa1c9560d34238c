//! Storage gateway for the off-chain storage service (OCS).
//!
//! Callers hand the [`Gateway`] an [`ObjectRecord`](ocs_types::ObjectRecord)
//! and get back a receipt or the payload. The gateway picks a persistence
//! strategy from the record's mode and payload length, opens one time-bounded
//! connection to the backing store, does the work, and releases the
//! connection whatever the outcome.
//!
//! # Strategies
//!
//! - [`InlineStore`] -- payloads up to [`INLINE_THRESHOLD`](ocs_types::INLINE_THRESHOLD)
//!   bytes, embedded in a single document
//! - [`ChunkedStore`] -- larger payloads (or any payload in chunked mode),
//!   split into chunk documents plus one file document
//! - raw insert -- a caller-supplied document stored verbatim
//!
//! # Design Rules
//!
//! 1. Upload and download route through the same length predicate.
//! 2. One lease per call; every acquired lease is released.
//! 3. A name is unique within its namespace for payload uploads.
//! 4. Errors are returned, never logged-and-exited.

pub mod chunked;
pub mod config;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod inline;
pub mod metadata;
pub mod resolver;
pub mod router;

/// Collection names shared by every strategy.
pub mod collections {
    /// Inline documents, chunked file documents, and raw documents.
    pub const FILES: &str = "fs.files";
    /// Chunk documents of chunked objects.
    pub const CHUNKS: &str = "fs.chunks";
}

// Re-export primary types at crate root for ergonomic imports.
pub use chunked::{Bucket, ChunkedStore, DownloadStream, UploadStream};
pub use config::{GatewayConfig, DEFAULT_CHUNK_SIZE};
pub use connection::{ConnectionManager, ConnectionStats, Lease};
pub use error::{GatewayError, GatewayResult};
pub use gateway::{Gateway, UploadReceipt};
pub use inline::InlineStore;
pub use metadata::{find_metadata, name_in_use};
pub use resolver::{EndpointResolver, StaticResolver, DEFAULT_ENDPOINT_KEY};
pub use router::{route, route_download};
