//! Size-threshold routing between storage strategies.
//!
//! Upload and download both go through [`Strategy::for_length`], so a given
//! length always maps to the same strategy on either side.

use ocs_types::{StorageMode, Strategy};
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};

/// Strategy for writing a payload of `length` bytes under `mode`.
pub fn route(mode: StorageMode, length: u64) -> GatewayResult<Strategy> {
    let strategy = match mode {
        StorageMode::InlineDocumentStore => Strategy::for_length(length),
        StorageMode::ChunkedStreamStore => Strategy::Chunked,
        StorageMode::RawDocumentInsert => Strategy::Raw,
        StorageMode::DistributedStore => return Err(GatewayError::NotImplemented(mode)),
    };
    debug!(%mode, length, %strategy, "routed upload");
    Ok(strategy)
}

/// Strategy for reading back an object whose stored length is `length`.
pub fn route_download(mode: StorageMode, length: u64) -> GatewayResult<Strategy> {
    let strategy = match mode {
        StorageMode::InlineDocumentStore => Strategy::for_length(length),
        StorageMode::ChunkedStreamStore => Strategy::Chunked,
        StorageMode::RawDocumentInsert => {
            return Err(GatewayError::InvalidRecord(
                "raw documents carry no payload to download".into(),
            ))
        }
        StorageMode::DistributedStore => return Err(GatewayError::NotImplemented(mode)),
    };
    debug!(%mode, length, %strategy, "routed download");
    Ok(strategy)
}
