//! Asset location strategies, one per [`AssetRole`].
//!
//! A strategy reads its rows for a chunk and turns each row into a
//! [`PlannedItem`]: the original value, one slot per discovered reference
//! (with a job unless policy skipped it) and the means to rebuild the value
//! once results are in. Keys are assigned here, at planning time, so they do
//! not depend on the order in which jobs finish.

use crate::config::{RoleToggles, StorageConfig};
use crate::datastore::Datastore;
use crate::discovery::markup::MarkupDocument;
use crate::discovery::serialized::SerializedArray;
use crate::error::Result;
use crate::keys::{derive_key, safe_name, ExtensionPolicy, SequenceCounter};
use crate::scheduler::AssetJob;
use crate::types::{AssetResult, AssetRole, AuditRow, RecordId};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Per-chunk inputs to key derivation.
pub struct KeyContext<'a> {
    policy: &'a ExtensionPolicy,
    names: HashMap<RecordId, String>,
    prefixes: HashMap<RecordId, String>,
    root_prefix: String,
    sequences: SequenceCounter,
}

impl<'a> KeyContext<'a> {
    /// `names` and `prefixes` map record ids to sanitized names and key
    /// prefixes; `root_prefix` is used for records without an entry.
    pub fn new(
        policy: &'a ExtensionPolicy,
        names: HashMap<RecordId, String>,
        prefixes: HashMap<RecordId, String>,
        root_prefix: String,
    ) -> Self {
        Self {
            policy,
            names,
            prefixes,
            root_prefix,
            sequences: SequenceCounter::new(),
        }
    }

    /// Derive the job for one reference, or `None` if policy rejects it.
    pub fn job_for(&mut self, record_id: RecordId, role: AssetRole, url: &str) -> Option<AssetJob> {
        let ext = match self.policy.resolve(url) {
            Ok(ext) => ext,
            Err(reason) => {
                debug!("Skipping {} asset {} of record {}: {}", role, url, record_id, reason);
                return None;
            }
        };

        let seq = self.sequences.next(record_id, role);
        let name = self
            .names
            .get(&record_id)
            .cloned()
            .unwrap_or_else(|| safe_name(record_id, ""));
        let prefix = self.prefixes.get(&record_id).unwrap_or(&self.root_prefix);

        Some(AssetJob {
            source_url: url.trim().to_string(),
            key: derive_key(prefix, &name, role, seq, &ext),
        })
    }
}

/// How a finished item turns slot results back into a value.
#[derive(Debug, Clone)]
enum Rewrite {
    /// The value is the reference.
    Whole,
    /// Each slot is one `<img>` of the body.
    Markup(MarkupDocument),
    /// Each slot is one string entry; `positions[i]` is its entry index.
    Serialized {
        array: SerializedArray,
        positions: Vec<usize>,
    },
}

/// One datastore row with the references found in it.
#[derive(Debug, Clone)]
pub struct PlannedItem {
    pub role: AssetRole,
    /// Write-back identity of the row.
    pub id: i64,
    pub record_id: RecordId,
    pub original: String,
    /// Source reference of each slot, as it appears in the value.
    references: Vec<String>,
    /// Job per slot; `None` when skipped by policy.
    jobs: Vec<Option<AssetJob>>,
    rewrite: Rewrite,
}

/// Value change plus audit rows produced by one completed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub update: Option<(String, i64)>,
    pub audit: Vec<AuditRow>,
}

impl PlannedItem {
    pub fn jobs(&self) -> impl Iterator<Item = &AssetJob> {
        self.jobs.iter().flatten()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.iter().filter(|job| job.is_some()).count()
    }

    pub fn slot_count(&self) -> usize {
        self.jobs.len()
    }

    /// Build the item's outcome from the results of its jobs, in job order.
    pub fn complete(&self, results: &[AssetResult], storage: &StorageConfig) -> ItemOutcome {
        let mut results = results.iter();
        let mut audit = Vec::new();
        let mut replacements: Vec<Option<String>> = Vec::with_capacity(self.jobs.len());

        for (reference, job) in self.references.iter().zip(&self.jobs) {
            if job.is_none() {
                replacements.push(None);
                continue;
            }
            match results.next() {
                Some(AssetResult::Stored { key }) => {
                    let new = storage.public_url(key);
                    audit.push(AuditRow {
                        id: self.id,
                        old: reference.clone(),
                        new: new.clone(),
                    });
                    replacements.push(Some(new));
                }
                Some(AssetResult::Missing) => {
                    audit.push(AuditRow {
                        id: self.id,
                        old: reference.clone(),
                        new: reference.clone(),
                    });
                    replacements.push(None);
                }
                Some(AssetResult::Skipped) | None => replacements.push(None),
            }
        }

        let new_value = match &self.rewrite {
            Rewrite::Whole => replacements
                .into_iter()
                .next()
                .flatten()
                .unwrap_or_else(|| self.original.clone()),
            Rewrite::Markup(document) => document.rewrite(&replacements),
            Rewrite::Serialized { array, positions } => {
                let mut array = array.clone();
                for (position, replacement) in positions.iter().zip(replacements) {
                    if let Some(new) = replacement {
                        array.set_string(*position, new);
                    }
                }
                array.encode()
            }
        };

        let update = (new_value != self.original).then_some((new_value, self.id));
        ItemOutcome { update, audit }
    }
}

/// Discovers the assets of one role for a chunk.
pub trait RoleStrategy: Send + Sync {
    fn role(&self) -> AssetRole;

    fn plan(
        &self,
        datastore: &mut dyn Datastore,
        ids: &[RecordId],
        keys: &mut KeyContext<'_>,
    ) -> Result<Vec<PlannedItem>>;
}

/// Attachment rows: the URL column is the reference.
#[derive(Debug, Default)]
pub struct AttachmentStrategy;

impl RoleStrategy for AttachmentStrategy {
    fn role(&self) -> AssetRole {
        AssetRole::Attachment
    }

    fn plan(
        &self,
        datastore: &mut dyn Datastore,
        ids: &[RecordId],
        keys: &mut KeyContext<'_>,
    ) -> Result<Vec<PlannedItem>> {
        let rows = datastore.list_attachments(ids)?;
        Ok(rows
            .into_iter()
            .filter(|row| !row.url.trim().is_empty())
            .map(|row| {
                let job = keys.job_for(row.record_id, AssetRole::Attachment, &row.url);
                PlannedItem {
                    role: AssetRole::Attachment,
                    id: row.asset_id,
                    record_id: row.record_id,
                    references: vec![row.url.clone()],
                    original: row.url,
                    jobs: vec![job],
                    rewrite: Rewrite::Whole,
                }
            })
            .collect())
    }
}

/// `<img>` elements embedded in record bodies.
#[derive(Debug, Default)]
pub struct ContentStrategy;

impl RoleStrategy for ContentStrategy {
    fn role(&self) -> AssetRole {
        AssetRole::Content
    }

    fn plan(
        &self,
        datastore: &mut dyn Datastore,
        ids: &[RecordId],
        keys: &mut KeyContext<'_>,
    ) -> Result<Vec<PlannedItem>> {
        let rows = datastore.list_content_bodies(ids)?;
        let mut items = Vec::new();

        for row in rows {
            let document = MarkupDocument::parse(&row.body);
            if document.images().is_empty() {
                continue;
            }

            let references: Vec<String> =
                document.images().iter().map(|img| img.url.clone()).collect();
            let jobs = references
                .iter()
                .map(|url| keys.job_for(row.record_id, AssetRole::Content, url))
                .collect();

            items.push(PlannedItem {
                role: AssetRole::Content,
                id: row.record_id,
                record_id: row.record_id,
                original: row.body,
                references,
                jobs,
                rewrite: Rewrite::Markup(document),
            });
        }

        Ok(items)
    }
}

/// String entries of the legacy serialized metadata array.
#[derive(Debug, Default)]
pub struct MetadataStrategy;

impl RoleStrategy for MetadataStrategy {
    fn role(&self) -> AssetRole {
        AssetRole::Metadata
    }

    fn plan(
        &self,
        datastore: &mut dyn Datastore,
        ids: &[RecordId],
        keys: &mut KeyContext<'_>,
    ) -> Result<Vec<PlannedItem>> {
        let rows = datastore.list_metadata(ids)?;
        let mut items = Vec::new();

        for row in rows {
            let array = match SerializedArray::decode(&row.blob) {
                Ok(array) => array,
                Err(e) => {
                    warn!(
                        "Leaving metadata {} of record {} untouched: {}",
                        row.meta_id, row.record_id, e
                    );
                    continue;
                }
            };

            let (positions, references): (Vec<usize>, Vec<String>) = array
                .string_values()
                .filter(|(_, value)| !value.trim().is_empty())
                .map(|(position, value)| (position, value.to_string()))
                .unzip();
            if references.is_empty() {
                continue;
            }

            let jobs = references
                .iter()
                .map(|url| keys.job_for(row.record_id, AssetRole::Metadata, url))
                .collect();

            items.push(PlannedItem {
                role: AssetRole::Metadata,
                id: row.meta_id,
                record_id: row.record_id,
                original: row.blob,
                references,
                jobs,
                rewrite: Rewrite::Serialized { array, positions },
            });
        }

        Ok(items)
    }
}

/// Enabled strategies in fixed role order.
pub fn strategies_from_config(toggles: &RoleToggles) -> Vec<Box<dyn RoleStrategy>> {
    let mut strategies: Vec<Box<dyn RoleStrategy>> = Vec::new();
    if toggles.attachment {
        strategies.push(Box::new(AttachmentStrategy));
    }
    if toggles.content {
        strategies.push(Box::new(ContentStrategy));
    }
    if toggles.metadata {
        strategies.push(Box::new(MetadataStrategy));
    }
    strategies
}
