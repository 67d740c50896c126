//! In-process object store.
//!
//! Keeps objects in a map and can be told to answer every put with a fixed
//! failure status. Used for rehearsals and tests.

use super::ObjectStore;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    forced_status: AtomicU16,
    puts: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every subsequent put with `status` without storing anything.
    pub fn fail_with_status(&self, status: u16) {
        self.forced_status.store(status, Ordering::SeqCst);
    }

    pub fn clear_failure(&self) {
        self.forced_status.store(0, Ordering::SeqCst);
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .ok()?
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Stored keys of `bucket`, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| {
                objects
                    .keys()
                    .filter(|(b, _)| b == bucket)
                    .map(|(_, k)| k.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of put calls, successful or not.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<u16> {
        self.puts.fetch_add(1, Ordering::SeqCst);

        let forced = self.forced_status.load(Ordering::SeqCst);
        if forced != 0 {
            return Ok(forced);
        }

        let mut objects = self
            .objects
            .lock()
            .map_err(|e| crate::error::RehostError::Other(format!("Object map poisoned: {}", e)))?;
        objects.insert((bucket.to_string(), key.to_string()), bytes);
        Ok(200)
    }
}
