//! Object storage backends.
//!
//! [`ObjectStore::put`] reports the service's HTTP status rather than
//! judging it, so the worker alone decides what counts as a fatal write.

mod memory;
mod s3;

pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

use crate::error::Result;
use async_trait::async_trait;

/// Destination for re-hosted assets. Shared by every worker of a chunk.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key`, returning the service status code.
    ///
    /// `Err` is reserved for failures that produced no status at all
    /// (transport errors, misconfigured clients).
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<u16>;
}

/// Content type guessed from a key's extension.
pub fn content_type_for_key(key: &str) -> &'static str {
    let ext = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "avif" => "image/avif",
        _ => "application/octet-stream",
    }
}
