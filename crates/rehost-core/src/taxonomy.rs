//! Taxonomy graph and category path resolution.
//!
//! The graph is rebuilt from scratch for every chunk. Term volume is small
//! next to record volume, so the whole table is read each time and only the
//! record associations are restricted to the chunk.

use crate::config::KeyConfig;
use crate::datastore::Datastore;
use crate::error::Result;
use crate::types::{RecordId, TaxonomyId, TermId};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Raw node row as returned by the taxonomy source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomyRow {
    pub term_id: TermId,
    pub taxonomy_id: TaxonomyId,
    /// Parent as a raw term id; `0` means no parent.
    pub parent_term_id: TermId,
    pub name: String,
    pub slug: String,
    pub kind: String,
}

/// A classification node with its parent resolved to a taxonomy id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomyNode {
    pub id: TaxonomyId,
    pub term_id: TermId,
    pub name: String,
    pub slug: String,
    pub kind: String,
    pub parent: Option<TaxonomyId>,
}

/// Forest of taxonomy nodes.
#[derive(Debug, Clone, Default)]
pub struct TaxonomyGraph {
    nodes: HashMap<TaxonomyId, TaxonomyNode>,
}

impl TaxonomyGraph {
    /// Build the graph, resolving parents through the term → taxonomy table.
    pub fn from_rows(rows: Vec<TaxonomyRow>) -> Self {
        let term_to_taxonomy: HashMap<TermId, TaxonomyId> = rows
            .iter()
            .map(|row| (row.term_id, row.taxonomy_id))
            .collect();

        let nodes = rows
            .into_iter()
            .map(|row| {
                let parent = term_to_taxonomy
                    .get(&row.parent_term_id)
                    .copied()
                    .filter(|parent| *parent != row.taxonomy_id);
                let node = TaxonomyNode {
                    id: row.taxonomy_id,
                    term_id: row.term_id,
                    name: row.name,
                    slug: row.slug,
                    kind: row.kind,
                    parent,
                };
                (node.id, node)
            })
            .collect();

        Self { nodes }
    }

    pub fn get(&self, id: TaxonomyId) -> Option<&TaxonomyNode> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of ancestors above `id`.
    ///
    /// The walk is bounded by the node count, so a cycle in the source data
    /// yields a finite depth instead of looping.
    pub fn depth(&self, id: TaxonomyId) -> usize {
        let mut depth = 0;
        let mut current = self.nodes.get(&id).and_then(|n| n.parent);
        while let Some(parent) = current {
            if depth >= self.nodes.len() {
                break;
            }
            depth += 1;
            current = self.nodes.get(&parent).and_then(|n| n.parent);
        }
        depth
    }
}

/// Terms of one record grouped by kind, in association order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordTerms {
    by_kind: HashMap<String, Vec<TaxonomyId>>,
}

impl RecordTerms {
    pub fn of_kind(&self, kind: &str) -> &[TaxonomyId] {
        self.by_kind.get(kind).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Taxonomy snapshot for one chunk.
#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    pub graph: TaxonomyGraph,
    pub record_terms: HashMap<RecordId, RecordTerms>,
}

impl Taxonomy {
    /// Assemble a snapshot from raw rows, keeping only associations of `ids`.
    pub fn build(
        rows: Vec<TaxonomyRow>,
        associations: Vec<(RecordId, TaxonomyId)>,
        ids: &[RecordId],
    ) -> Self {
        let graph = TaxonomyGraph::from_rows(rows);
        let wanted: HashSet<RecordId> = ids.iter().copied().collect();
        let mut record_terms: HashMap<RecordId, RecordTerms> = HashMap::new();

        for (record_id, taxonomy_id) in associations {
            if !wanted.contains(&record_id) {
                continue;
            }
            let Some(node) = graph.get(taxonomy_id) else {
                debug!(
                    "Record {} references unknown taxonomy {}",
                    record_id, taxonomy_id
                );
                continue;
            };
            record_terms
                .entry(record_id)
                .or_default()
                .by_kind
                .entry(node.kind.clone())
                .or_default()
                .push(taxonomy_id);
        }

        Self {
            graph,
            record_terms,
        }
    }

    pub fn terms_for(&self, record_id: RecordId) -> Option<&RecordTerms> {
        self.record_terms.get(&record_id)
    }
}

/// Read the taxonomy source and build the snapshot for `ids`.
pub fn resolve(datastore: &mut dyn Datastore, ids: &[RecordId]) -> Result<Taxonomy> {
    let rows = datastore.list_taxonomy_nodes()?;
    let associations = datastore.list_record_terms(ids)?;
    let taxonomy = Taxonomy::build(rows, associations, ids);
    debug!(
        "Taxonomy resolved: {} nodes, {} records with terms",
        taxonomy.graph.len(),
        taxonomy.record_terms.len()
    );
    Ok(taxonomy)
}

/// Picks the taxonomy kind a record's category path is built from.
#[derive(Debug, Clone)]
pub struct CategoryPathStrategy {
    kinds: Vec<String>,
}

impl CategoryPathStrategy {
    pub fn new(kinds: Vec<String>) -> Self {
        Self { kinds }
    }

    pub fn from_config(config: &KeyConfig) -> Self {
        Self::new(config.category_kinds.clone())
    }

    /// Slugs of the first preferred kind the record has terms of.
    ///
    /// Ancestors come before descendants; equal depths keep association order.
    pub fn category_path(&self, taxonomy: &Taxonomy, record_id: RecordId) -> Vec<String> {
        let Some(terms) = taxonomy.terms_for(record_id) else {
            return Vec::new();
        };

        let Some(selected) = self
            .kinds
            .iter()
            .map(|kind| terms.of_kind(kind))
            .find(|ids| !ids.is_empty())
        else {
            return Vec::new();
        };

        let mut ordered: Vec<(usize, TaxonomyId)> = selected
            .iter()
            .map(|id| (taxonomy.graph.depth(*id), *id))
            .collect();
        ordered.sort_by_key(|(depth, _)| *depth);

        ordered
            .into_iter()
            .filter_map(|(_, id)| taxonomy.graph.get(id).map(|node| node.slug.clone()))
            .collect()
    }
}
