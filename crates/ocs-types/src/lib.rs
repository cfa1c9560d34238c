//! Foundation types for the off-chain storage gateway (OCS).
//!
//! Every other OCS crate depends on `ocs-types`. The types here describe a
//! single unit of work (an [`ObjectRecord`]), how the caller wants it stored
//! ([`StorageMode`]), and how the gateway decides between the inline and
//! chunked persistence strategies ([`Strategy`]).
//!
//! # Key Types
//!
//! - [`ObjectRecord`] -- payload, name, namespace, and mode for one upload/download
//! - [`StorageMode`] -- closed set of storage backends a caller can select
//! - [`Strategy`] -- concrete persistence strategy chosen for a payload
//! - [`StoredMetadata`] -- name and length read back before a payload
//! - [`INLINE_THRESHOLD`] -- the one size boundary shared by upload and download

pub mod error;
pub mod mode;
pub mod record;
pub mod strategy;

pub use error::TypeError;
pub use mode::StorageMode;
pub use record::{ObjectRecord, RawDocument};
pub use strategy::{StoredMetadata, Strategy, INLINE_THRESHOLD};
