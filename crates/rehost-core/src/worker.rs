//! Fetch one remote asset and store it under its derived key.

use crate::error::{RehostError, Result};
use crate::network::{HttpClient, RetryPolicy};
use crate::storage::ObjectStore;
use crate::types::AssetResult;
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared by every job of a chunk; cloning is cheap.
#[derive(Clone)]
pub struct AssetWorker {
    http: Arc<HttpClient>,
    store: Arc<dyn ObjectStore>,
    bucket: String,
    retry: RetryPolicy,
}

impl AssetWorker {
    pub fn new(
        http: Arc<HttpClient>,
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            store,
            bucket: bucket.into(),
            retry,
        }
    }

    /// Copy `source_url` to `key`.
    ///
    /// Permanently missing sources yield [`AssetResult::Missing`]. Fetch
    /// failures left after retries and any object store failure are returned
    /// as errors and abort the run.
    pub async fn fetch_and_store(&self, source_url: &str, key: &str) -> Result<AssetResult> {
        let (fetched, stats) = self.retry.run(|| self.http.get_bytes(source_url)).await;

        let bytes = match fetched {
            Ok(bytes) => bytes,
            Err(e) if e.is_permanent_missing() => {
                warn!("Asset missing, keeping reference: {}", e);
                return Ok(AssetResult::Missing);
            }
            Err(e) => return Err(e),
        };

        if stats.attempts > 1 {
            debug!("Fetched {} after {} attempts", source_url, stats.attempts);
        }

        let status = self.store.put(&self.bucket, key, bytes).await?;
        if !(200..300).contains(&status) {
            return Err(RehostError::ObjectStoreStatus {
                key: key.to_string(),
                status,
            });
        }

        debug!("Stored {} as {}", source_url, key);
        Ok(AssetResult::Stored {
            key: key.to_string(),
        })
    }
}
