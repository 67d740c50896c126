//! Relational datastore access.
//!
//! [`Datastore`] is the seam between the engine and the content database:
//! record and taxonomy reads, the three asset-location sources, and the
//! transactional batched write-back. [`SqliteDatastore`] implements it for a
//! WordPress-shaped schema.

mod sqlite;

pub use sqlite::SqliteDatastore;

use crate::error::Result;
use crate::taxonomy::TaxonomyRow;
use crate::types::{BatchUpdate, RecordId, RecordSummary, TaxonomyId};

/// Which records make up the working set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFilter {
    pub types: Vec<String>,
    pub status: Option<String>,
}

/// Attachment row: the asset's URL column is the reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRow {
    pub record_id: RecordId,
    pub asset_id: i64,
    pub url: String,
}

/// Markup body of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRow {
    pub record_id: RecordId,
    pub body: String,
}

/// Legacy serialized metadata blob attached to a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRow {
    pub record_id: RecordId,
    pub meta_id: i64,
    pub blob: String,
}

/// Read and write access to the content database.
///
/// Every `ids` slice is a single chunk; implementations may assume it is
/// small enough for one `IN (...)` query.
pub trait Datastore: Send {
    /// Probe the connection and reopen it once if it was dropped.
    fn ensure_connected(&mut self) -> Result<()>;

    /// All in-scope record ids, in stable order.
    fn list_record_ids(&mut self, filter: &RecordFilter) -> Result<Vec<RecordId>>;

    fn list_records(&mut self, ids: &[RecordId]) -> Result<Vec<RecordSummary>>;

    fn list_taxonomy_nodes(&mut self) -> Result<Vec<TaxonomyRow>>;

    fn list_record_terms(&mut self, ids: &[RecordId]) -> Result<Vec<(RecordId, TaxonomyId)>>;

    fn list_attachments(&mut self, ids: &[RecordId]) -> Result<Vec<AttachmentRow>>;

    fn list_content_bodies(&mut self, ids: &[RecordId]) -> Result<Vec<ContentRow>>;

    fn list_metadata(&mut self, ids: &[RecordId]) -> Result<Vec<MetadataRow>>;

    /// Apply all batches in one transaction; nothing is committed on error.
    fn apply_batches(&mut self, batches: &[BatchUpdate]) -> Result<()>;
}
