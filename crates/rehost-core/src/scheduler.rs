//! Bounded fan-out/fan-in of asset jobs within one chunk.
//!
//! Jobs are tagged with their submission ticket and results come back in
//! ticket order, regardless of which finished first.

use crate::error::{RehostError, Result};
use crate::types::AssetResult;
use crate::worker::AssetWorker;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error};

/// One fetch-and-store unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetJob {
    pub source_url: String,
    pub key: String,
}

/// Worker pool for a single chunk.
#[derive(Debug, Clone)]
pub struct ChunkScheduler {
    workers: usize,
}

impl ChunkScheduler {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Run every job through `worker` and wait for all of them.
    pub async fn run(&self, worker: &AssetWorker, jobs: Vec<AssetJob>) -> Result<Vec<AssetResult>> {
        let worker = worker.clone();
        self.run_with(jobs, move |job: AssetJob| {
            let worker = worker.clone();
            async move { worker.fetch_and_store(&job.source_url, &job.key).await }
        })
        .await
    }

    /// Run `task` over `jobs` with at most `workers` in flight.
    ///
    /// After the first fatal error no further jobs are submitted, but those
    /// already running are awaited before the error is returned.
    pub async fn run_with<J, R, F, Fut>(&self, jobs: Vec<J>, task: F) -> Result<Vec<R>>
    where
        J: Send + 'static,
        R: Send + 'static,
        F: Fn(J) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let total = jobs.len();
        let permits = Arc::new(Semaphore::new(self.workers));
        let task = Arc::new(task);
        let mut results: Vec<Option<R>> = (0..total).map(|_| None).collect();
        let mut first_error: Option<RehostError> = None;
        let mut join_set = JoinSet::new();
        let failed = Arc::new(AtomicBool::new(false));

        for (ticket, job) in jobs.into_iter().enumerate() {
            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| RehostError::Worker {
                    message: format!("Worker pool closed: {}", e),
                })?;

            // Checked while holding the slot a finished job just released.
            while let Some(joined) = join_set.try_join_next() {
                collect(joined, &mut results, &mut first_error);
            }
            if first_error.is_some() || failed.load(Ordering::SeqCst) {
                debug!("Fatal error seen, not submitting remaining {} jobs", total - ticket);
                break;
            }

            let task = Arc::clone(&task);
            let mark = FailureMark::new(Arc::clone(&failed));
            join_set.spawn(async move {
                let _permit = permit;
                let mut mark = mark;
                let result = task(job).await;
                mark.armed = result.is_err();
                (ticket, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            collect(joined, &mut results, &mut first_error);
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        results
            .into_iter()
            .enumerate()
            .map(|(ticket, result)| {
                result.ok_or_else(|| RehostError::Worker {
                    message: format!("Job {} produced no result", ticket),
                })
            })
            .collect()
    }
}

/// Raises the shared failure flag when dropped while armed.
///
/// Declared after the permit inside each job, so it drops first and the flag
/// is visible before the slot is released. A panicking job leaves it armed.
struct FailureMark {
    flag: Arc<AtomicBool>,
    armed: bool,
}

impl FailureMark {
    fn new(flag: Arc<AtomicBool>) -> Self {
        Self { flag, armed: true }
    }
}

impl Drop for FailureMark {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(true, Ordering::SeqCst);
        }
    }
}

fn collect<R>(
    joined: std::result::Result<(usize, Result<R>), JoinError>,
    results: &mut [Option<R>],
    first_error: &mut Option<RehostError>,
) {
    let err = match joined {
        Ok((ticket, Ok(result))) => {
            results[ticket] = Some(result);
            return;
        }
        Ok((ticket, Err(e))) => {
            error!("Job {} failed: {}", ticket, e);
            e
        }
        Err(e) => RehostError::Worker {
            message: format!("Asset job panicked or was cancelled: {}", e),
        },
    };
    if first_error.is_none() {
        *first_error = Some(err);
    }
}
