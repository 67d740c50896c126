//! Chunked, resumable migration driver.
//!
//! For each chunk from the resume point on: read records and taxonomy, plan
//! every enabled role, fetch and store all assets, write the rewritten
//! values in one transaction, append audit rows, persist the checkpoint and
//! cool down. A chunk either completes all of these or leaves the
//! checkpoint where it was.

use crate::config::MigratorConfig;
use crate::datastore::{Datastore, RecordFilter};
use crate::error::{RehostError, Result};
use crate::keys::{derive_prefix, safe_name, ExtensionPolicy};
use crate::network::{HttpClient, RetryPolicy};
use crate::roles::{strategies_from_config, KeyContext, PlannedItem, RoleStrategy};
use crate::scheduler::{AssetJob, ChunkScheduler};
use crate::state::RunState;
use crate::storage::ObjectStore;
use crate::taxonomy::{self, CategoryPathStrategy};
use crate::types::{AssetResult, AssetRole, AuditRow, BatchUpdate, RecordId};
use crate::worker::AssetWorker;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Number of chunks needed for `len` ids.
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    len.div_ceil(chunk_size.max(1))
}

/// Index range of chunk `index`.
pub fn chunk_bounds(index: usize, len: usize, chunk_size: usize) -> Range<usize> {
    let chunk_size = chunk_size.max(1);
    let start = (index * chunk_size).min(len);
    let end = ((index + 1) * chunk_size).min(len);
    start..end
}

/// Per-invocation switches.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Back up all state and re-query the working set.
    pub fresh_snapshot: bool,
    /// Run everything except the datastore mutation.
    pub dry_run: bool,
    /// Stop after this many chunks, leaving the checkpoint in place.
    pub max_chunks: Option<usize>,
}

/// Counters for one chunk or a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationStats {
    pub assets_scheduled: usize,
    pub stored: usize,
    pub missing: usize,
    pub skipped: usize,
    pub rows_updated: usize,
}

impl MigrationStats {
    fn merge(&mut self, other: &MigrationStats) {
        self.assets_scheduled += other.assets_scheduled;
        self.stored += other.stored;
        self.missing += other.missing;
        self.skipped += other.skipped;
        self.rows_updated += other.rows_updated;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total_ids: usize,
    pub chunk_count: usize,
    pub first_chunk: usize,
    pub chunks_processed: usize,
    /// True when the last chunk was committed and state was cleaned up.
    pub completed: bool,
    pub stats: MigrationStats,
}

pub struct MigrationDriver {
    config: MigratorConfig,
    datastore: Box<dyn Datastore>,
    worker: AssetWorker,
    scheduler: ChunkScheduler,
    strategies: Vec<Box<dyn RoleStrategy>>,
    categories: CategoryPathStrategy,
    policy: ExtensionPolicy,
    state: RunState,
}

impl MigrationDriver {
    pub fn new(
        config: MigratorConfig,
        datastore: Box<dyn Datastore>,
        http: Arc<HttpClient>,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.run.state_dir)
            .map_err(|e| RehostError::io_with_path(e, &config.run.state_dir))?;

        let retry = RetryPolicy::transient_fetch(config.retry.to_retry_config());
        let worker = AssetWorker::new(http, store, config.storage.bucket.clone(), retry);

        Ok(Self {
            scheduler: ChunkScheduler::new(config.run.workers),
            strategies: strategies_from_config(&config.roles),
            categories: CategoryPathStrategy::from_config(&config.keys),
            policy: ExtensionPolicy::from_config(&config.keys)?,
            state: RunState::in_dir(&config.run.state_dir),
            worker,
            datastore,
            config,
        })
    }

    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    /// Query the working set anew and persist it, resetting all run state.
    pub fn snapshot_working_set(&mut self) -> Result<Vec<RecordId>> {
        self.state.reset()?;
        self.datastore.ensure_connected()?;

        let filter = RecordFilter {
            types: self.config.datastore.record_types.clone(),
            status: self.config.datastore.record_status.clone(),
        };
        let ids = self.datastore.list_record_ids(&filter)?;
        self.state.ids.save(&ids)?;

        info!(
            "Snapshot of {} records saved to {}",
            ids.len(),
            self.state.ids.path().display()
        );
        Ok(ids)
    }

    fn load_working_set(&mut self, fresh: bool) -> Result<Vec<RecordId>> {
        if fresh {
            return self.snapshot_working_set();
        }
        match self.state.ids.load()? {
            Some(ids) => {
                info!("Loaded {} record ids from {}", ids.len(), self.state.ids.path().display());
                Ok(ids)
            }
            None => {
                info!("No id list found, taking a snapshot");
                self.snapshot_working_set()
            }
        }
    }

    /// Process chunks from the resume point until done or `max_chunks` is hit.
    pub async fn run(&mut self, options: &RunOptions) -> Result<RunSummary> {
        let run_start = Instant::now();
        if options.dry_run {
            warn!("Dry run: datastore writes are skipped, audit logs and checkpoint still advance");
        }

        let ids = self.load_working_set(options.fresh_snapshot)?;
        let chunk_size = self.config.run.chunk_size;
        let total_chunks = chunk_count(ids.len(), chunk_size);
        let first_chunk = self.state.checkpoint.resume_point();
        let end_chunk = match options.max_chunks {
            Some(max) => first_chunk.saturating_add(max).min(total_chunks),
            None => total_chunks,
        };

        let mut summary = RunSummary {
            total_ids: ids.len(),
            chunk_count: total_chunks,
            first_chunk,
            ..RunSummary::default()
        };

        if first_chunk > 0 {
            info!("Resuming at chunk {}/{}", first_chunk + 1, total_chunks);
        }

        for index in first_chunk..end_chunk {
            let chunk_start = Instant::now();
            let chunk_ids = &ids[chunk_bounds(index, ids.len(), chunk_size)];
            info!(
                "Chunk {}/{}: {} records",
                index + 1,
                total_chunks,
                chunk_ids.len()
            );

            let stats = self.process_chunk(chunk_ids, options.dry_run).await?;
            self.state.checkpoint.write(index)?;
            summary.chunks_processed += 1;
            summary.stats.merge(&stats);

            info!(
                "Chunk {}/{} committed in {:.2?}: {} stored, {} missing, {} skipped, {} rows updated",
                index + 1,
                total_chunks,
                chunk_start.elapsed(),
                stats.stored,
                stats.missing,
                stats.skipped,
                stats.rows_updated
            );

            if index + 1 < end_chunk {
                self.cooldown().await;
            }
        }

        if end_chunk >= total_chunks {
            self.state.checkpoint.clear()?;
            if let Some(backup) = self.state.ids.rotate()? {
                info!("Id list rotated to {}", backup.display());
            }
            summary.completed = true;
            info!(
                "Migration complete: {} chunks in {:.2?}",
                summary.chunks_processed,
                run_start.elapsed()
            );
        } else {
            info!(
                "Stopped after {} chunks; next run resumes at chunk {}/{}",
                summary.chunks_processed,
                end_chunk + 1,
                total_chunks
            );
        }

        Ok(summary)
    }

    async fn process_chunk(&mut self, ids: &[RecordId], dry_run: bool) -> Result<MigrationStats> {
        self.datastore.ensure_connected()?;

        let records = self.datastore.list_records(ids)?;
        let names: HashMap<RecordId, String> = records
            .iter()
            .map(|record| (record.id, safe_name(record.id, &record.name)))
            .collect();

        let taxonomy = taxonomy::resolve(self.datastore.as_mut(), ids)?;
        let root = derive_prefix(&self.config.keys.root_label, &[]);
        let prefixes: HashMap<RecordId, String> = ids
            .iter()
            .map(|id| {
                let path = self.categories.category_path(&taxonomy, *id);
                (*id, derive_prefix(&self.config.keys.root_label, &path))
            })
            .collect();

        let mut keys = KeyContext::new(&self.policy, names, prefixes, root);
        let mut items: Vec<PlannedItem> = Vec::new();
        for strategy in &self.strategies {
            let planned = strategy.plan(self.datastore.as_mut(), ids, &mut keys)?;
            debug!("{} role planned {} items", strategy.role(), planned.len());
            items.extend(planned);
        }

        let jobs: Vec<AssetJob> = items.iter().flat_map(|item| item.jobs().cloned()).collect();
        let mut stats = MigrationStats {
            assets_scheduled: jobs.len(),
            skipped: items
                .iter()
                .map(|item| item.slot_count() - item.job_count())
                .sum(),
            ..MigrationStats::default()
        };

        let results = self.scheduler.run(&self.worker, jobs).await?;
        for result in &results {
            match result {
                AssetResult::Stored { .. } => stats.stored += 1,
                AssetResult::Missing => stats.missing += 1,
                AssetResult::Skipped => stats.skipped += 1,
            }
        }

        let (batches, audits) = self.aggregate(&items, &results);
        stats.rows_updated = batches.iter().map(|batch| batch.rows.len()).sum();

        self.datastore.ensure_connected()?;
        if dry_run {
            if stats.rows_updated > 0 {
                warn!("Dry run: skipping {} row updates", stats.rows_updated);
            }
        } else {
            self.datastore.apply_batches(&batches)?;
        }

        for (role, rows) in &audits {
            if let Some(log) = self.state.audit(*role) {
                log.append(rows)?;
            }
        }

        Ok(stats)
    }

    /// Fold job results back into per-role batches and audit rows, in
    /// discovery order.
    fn aggregate(
        &self,
        items: &[PlannedItem],
        results: &[AssetResult],
    ) -> (Vec<BatchUpdate>, BTreeMap<AssetRole, Vec<AuditRow>>) {
        let mut batches: Vec<BatchUpdate> = self
            .strategies
            .iter()
            .map(|strategy| BatchUpdate {
                role: strategy.role(),
                rows: Vec::new(),
            })
            .collect();
        let mut audits: BTreeMap<AssetRole, Vec<AuditRow>> = BTreeMap::new();

        let mut cursor = 0;
        for item in items {
            let count = item.job_count();
            let outcome = item.complete(&results[cursor..cursor + count], &self.config.storage);
            cursor += count;

            if let Some(update) = outcome.update {
                if let Some(batch) = batches.iter_mut().find(|b| b.role == item.role) {
                    batch.rows.push(update);
                }
            }
            if !outcome.audit.is_empty() {
                audits.entry(item.role).or_default().extend(outcome.audit);
            }
        }

        batches.retain(|batch| !batch.is_empty());
        (batches, audits)
    }

    async fn cooldown(&self) {
        let (min, max) = (self.config.run.cooldown_min_ms, self.config.run.cooldown_max_ms);
        if max == 0 {
            return;
        }
        let millis = rand::rng().random_range(min..=max);
        debug!("Cooling down for {} ms", millis);
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}
