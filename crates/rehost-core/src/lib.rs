//! rehost - resumable bulk migration of record-referenced assets.
//!
//! Records live in a relational datastore and reference binary assets in
//! three ways: attachment rows, `<img>` elements in their body, and a legacy
//! serialized metadata array. The engine walks the record set in fixed-size
//! chunks, copies every referenced asset to object storage under a
//! deterministic key, rewrites the references and keeps a checkpoint plus
//! before/after audit logs so an interrupted run picks up where it stopped.
//!
//! # Example
//!
//! ```rust,ignore
//! use rehost::{HttpClient, MigrationDriver, MigratorConfig, RunOptions, S3ObjectStore, SqliteDatastore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> rehost::Result<()> {
//!     let config = MigratorConfig::load("rehost.json")?;
//!     let datastore = SqliteDatastore::open(&config.datastore)?;
//!     let store = S3ObjectStore::connect(&config.storage).await?;
//!     let http = HttpClient::with_limits(config.run.request_timeout(), config.run.max_connections)?;
//!
//!     let mut driver =
//!         MigrationDriver::new(config, Box::new(datastore), Arc::new(http), Arc::new(store))?;
//!     let summary = driver.run(&RunOptions::default()).await?;
//!     println!("{} chunks processed", summary.chunks_processed);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod datastore;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod keys;
pub mod network;
pub mod roles;
pub mod scheduler;
pub mod state;
pub mod storage;
pub mod taxonomy;
pub mod types;
pub mod worker;

// Re-export commonly used types
pub use config::{MigratorConfig, StorageConfig};
pub use datastore::{Datastore, SqliteDatastore};
pub use driver::{MigrationDriver, MigrationStats, RunOptions, RunSummary};
pub use error::{RehostError, Result};
pub use network::{HttpClient, RetryConfig, RetryPolicy};
pub use storage::{MemoryObjectStore, ObjectStore, S3ObjectStore};
pub use types::{AssetResult, AssetRole, AuditRow, RecordId};
pub use worker::AssetWorker;
