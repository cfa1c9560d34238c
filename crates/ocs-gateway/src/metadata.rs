use ocs_store::{Database, Filter};
use ocs_types::StoredMetadata;

use crate::collections::FILES;
use crate::error::GatewayResult;

/// Name field shared by inline documents and chunked file documents.
pub(crate) const FILENAME_FIELD: &str = "filename";
/// Payload length field shared by inline documents and chunked file documents.
pub(crate) const LENGTH_FIELD: &str = "length";

/// Look up the stored name and length of `name`, whichever strategy wrote it.
///
/// Raw documents share the files collection; a document named `name` that
/// carries no `length` is not a payload object and yields `None`.
pub async fn find_metadata(db: &dyn Database, name: &str) -> GatewayResult<Option<StoredMetadata>> {
    let Some(doc) = db.find_one(FILES, &Filter::eq(FILENAME_FIELD, name)).await? else {
        return Ok(None);
    };
    if !doc.contains_key(LENGTH_FIELD) {
        return Ok(None);
    }
    let length = doc.get_u64(LENGTH_FIELD)?;
    Ok(Some(StoredMetadata::new(doc.get_str(FILENAME_FIELD)?, length)))
}

/// Whether any document in the files collection, payload or raw, is named
/// `name`.
pub async fn name_in_use(db: &dyn Database, name: &str) -> GatewayResult<bool> {
    Ok(db
        .find_one(FILES, &Filter::eq(FILENAME_FIELD, name))
        .await?
        .is_some())
}
