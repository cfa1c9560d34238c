//! Backing document store for the off-chain storage gateway.
//!
//! The gateway never talks to a storage engine directly. It resolves a
//! connection string, asks the [`DriverRegistry`] for the [`Connector`] that
//! serves its scheme, and works with the resulting [`Connection`] and
//! [`Database`] handles. Everything above this crate (inline documents,
//! chunked buckets) is built from three primitives: `insert_one`,
//! `find_one`, and `find`.
//!
//! # Drivers
//!
//! - [`MemoryConnector`] -- `mem://<server>`, shared in-process servers for tests and embedding
//! - [`FsConnector`] -- `fs://<directory>`, one file per document
//!
//! # Design Rules
//!
//! 1. Databases and collections are created lazily on first insert.
//! 2. Every stored document has a UUID `_id`; drivers assign one when absent.
//! 3. A closed connection rejects further use with [`StoreError::Closed`].
//! 4. All I/O errors are propagated, never silently ignored.

pub mod document;
pub mod error;
pub mod fs;
pub mod memory;
pub mod registry;
pub mod traits;
pub mod uri;

pub use document::{Document, DocumentId, Filter, Value, ID_FIELD};
pub use error::{StoreError, StoreResult};
pub use fs::FsConnector;
pub use memory::{MemoryConnector, MemoryServer};
pub use registry::DriverRegistry;
pub use traits::{Connection, Connector, Database};
pub use uri::ConnectionString;
