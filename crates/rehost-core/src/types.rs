//! Core domain types shared across the pipeline.

use serde::{Deserialize, Serialize};

/// Datastore identity of a record.
pub type RecordId = i64;

/// Identity of a taxonomy node (term-taxonomy id).
pub type TaxonomyId = i64;

/// Raw term identity, resolved to a [`TaxonomyId`] through the indirection table.
pub type TermId = i64;

/// The three ways an asset is referenced by a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetRole {
    /// A child attachment row whose URL column is the reference.
    Attachment,
    /// An `<img>` element embedded in the record body.
    Content,
    /// An entry of the legacy serialized metadata array.
    Metadata,
}

impl AssetRole {
    pub const ALL: [AssetRole; 3] = [AssetRole::Attachment, AssetRole::Content, AssetRole::Metadata];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetRole::Attachment => "attachment",
            AssetRole::Content => "content",
            AssetRole::Metadata => "metadata",
        }
    }

    /// Marker inserted into the key stem; empty keeps legacy attachment names.
    pub fn tag(&self) -> &'static str {
        match self {
            AssetRole::Attachment => "",
            AssetRole::Content => "content",
            AssetRole::Metadata => "meta",
        }
    }
}

impl std::fmt::Display for AssetRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record as seen by the key deriver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSummary {
    pub id: RecordId,
    pub name: String,
}

/// Result of migrating one asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetResult {
    /// Stored under `key`; the reference is rewritten.
    Stored { key: String },
    /// The source is permanently gone; the reference stays as it was.
    Missing,
    /// Rejected by policy before fetching; no audit row.
    Skipped,
}

/// One row of an audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRow {
    pub id: i64,
    pub old: String,
    pub new: String,
}

/// Batched rewrites for one role: `(new_value, id)` pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchUpdate {
    pub role: AssetRole,
    pub rows: Vec<(String, i64)>,
}

impl BatchUpdate {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_tags() {
        assert_eq!(AssetRole::Attachment.tag(), "");
        assert_eq!(AssetRole::Content.tag(), "content");
        assert_eq!(AssetRole::Metadata.tag(), "meta");
    }

    #[test]
    fn test_role_serde_names() {
        assert_eq!(
            serde_json::to_string(&AssetRole::Metadata).unwrap(),
            "\"metadata\""
        );
    }
}
