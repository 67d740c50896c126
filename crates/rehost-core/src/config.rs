//! Centralized configuration for rehost.
//!
//! Constant tables hold file names and network defaults. [`MigratorConfig`]
//! is the operator-facing configuration, loaded from a JSON file where every
//! section except `storage` may be omitted.

use crate::error::{RehostError, Result};
use crate::network::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Names of the files kept in the state directory.
pub struct StateConfig;

impl StateConfig {
    pub const IDS_FILE: &'static str = "ids.txt";
    pub const CHECKPOINT_FILE: &'static str = "checkpoint.txt";
    pub const AUDIT_ATTACHMENT_FILE: &'static str = "audit-attachment.csv";
    pub const AUDIT_CONTENT_FILE: &'static str = "audit-content.csv";
    pub const AUDIT_METADATA_FILE: &'static str = "audit-metadata.csv";
    pub const BACKUP_INFIX: &'static str = "backup";
}

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
    pub const MAX_REDIRECTS: usize = 10;
    pub const USER_AGENT: &'static str = "rehost/0.3";
    pub const DEFAULT_MAX_CONNECTIONS: usize = 32;
    /// Upper bound accepted for `retry.max_delay_secs`.
    pub const MAX_RETRY_DELAY_SECS: u64 = 24 * 60 * 60;
}

/// Top-level migration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MigratorConfig {
    #[serde(default)]
    pub datastore: DatastoreConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub roles: RoleToggles,
    #[serde(default)]
    pub keys: KeyConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub retry: RetrySettings,
}

/// Where records live and which of them are in scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct DatastoreConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
    /// Prefix applied to every table name (`wp_posts`, `wp_terms`, ...).
    pub table_prefix: String,
    /// Record types included in the working set.
    pub record_types: Vec<String>,
    /// Optional status filter (e.g. `publish`).
    pub record_status: Option<String>,
    /// Mime type prefix an attachment must carry to be migrated.
    pub attachment_mime_prefix: String,
    /// Metadata key holding the legacy serialized blob.
    pub metadata_key: String,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("content.db"),
            table_prefix: "wp_".to_string(),
            record_types: vec!["post".to_string(), "product".to_string()],
            record_status: None,
            attachment_mime_prefix: "image/".to_string(),
            metadata_key: "_gallery_images".to_string(),
        }
    }
}

/// Object storage connection and addressing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StorageConfig {
    /// Custom endpoint for S3-compatible services.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// Static credentials; the AWS default chain is used when absent.
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    pub bucket: String,
    /// Public base URL objects are served from.
    pub cdn_base_url: String,
}

impl StorageConfig {
    /// Public URL of a stored object.
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.cdn_base_url.trim_end_matches('/'), key)
    }
}

/// Per-role feature toggles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RoleToggles {
    pub attachment: bool,
    pub content: bool,
    pub metadata: bool,
}

impl Default for RoleToggles {
    fn default() -> Self {
        Self {
            attachment: true,
            content: true,
            metadata: true,
        }
    }
}

/// Key derivation and asset acceptance rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct KeyConfig {
    pub root_label: String,
    /// Taxonomy kinds tried in order when building the category path.
    pub category_kinds: Vec<String>,
    pub allowed_extensions: Vec<String>,
    pub default_extension: String,
    /// URL regexes accepted even when their extension is not allowed.
    pub special_case_patterns: Vec<String>,
    /// Hosts known to be gone; assets there are skipped outright.
    pub dead_hosts: Vec<String>,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            root_label: "3d-model".to_string(),
            category_kinds: vec!["category".to_string(), "product_cat".to_string()],
            allowed_extensions: [".jpg", ".jpeg", ".png", ".gif", ".webp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            default_extension: ".jpg".to_string(),
            special_case_patterns: Vec::new(),
            dead_hosts: Vec::new(),
        }
    }
}

/// Chunking, concurrency and pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RunConfig {
    pub chunk_size: usize,
    pub workers: usize,
    pub max_connections: usize,
    pub request_timeout_secs: u64,
    pub state_dir: PathBuf,
    pub cooldown_min_ms: u64,
    pub cooldown_max_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            workers: 16,
            max_connections: NetworkConfig::DEFAULT_MAX_CONNECTIONS,
            request_timeout_secs: NetworkConfig::REQUEST_TIMEOUT.as_secs(),
            state_dir: PathBuf::from("."),
            cooldown_min_ms: 3000,
            cooldown_max_ms: 5000,
        }
    }
}

impl RunConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Fetch retry bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RetrySettings {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Base delay in seconds, doubled on each retry.
    pub backoff_factor_secs: f64,
    pub max_delay_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_factor_secs: 1.0,
            max_delay_secs: 60,
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(self.max_attempts)
            .with_base_delay(Duration::from_secs_f64(self.backoff_factor_secs))
            .with_max_delay(Duration::from_secs(self.max_delay_secs))
    }
}

impl MigratorConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| RehostError::io_with_path(e, path))?;
        let config: MigratorConfig =
            serde_json::from_str(&content).map_err(|e| RehostError::Json {
                message: format!("Failed to parse config {}: {}", path.display(), e),
                source: Some(e),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| Err(RehostError::Config { message });

        if self.run.chunk_size == 0 {
            return fail("run.chunk_size must be at least 1".into());
        }
        if self.run.workers == 0 {
            return fail("run.workers must be at least 1".into());
        }
        if self.run.max_connections == 0 {
            return fail("run.max_connections must be at least 1".into());
        }
        if self.run.cooldown_min_ms > self.run.cooldown_max_ms {
            return fail(format!(
                "run.cooldown_min_ms ({}) exceeds run.cooldown_max_ms ({})",
                self.run.cooldown_min_ms, self.run.cooldown_max_ms
            ));
        }
        if self.retry.max_attempts == 0 {
            return fail("retry.max_attempts must be at least 1".into());
        }
        if self.retry.max_delay_secs > NetworkConfig::MAX_RETRY_DELAY_SECS {
            return fail(format!(
                "retry.max_delay_secs ({}) exceeds {}",
                self.retry.max_delay_secs,
                NetworkConfig::MAX_RETRY_DELAY_SECS
            ));
        }
        let backoff = self.retry.backoff_factor_secs;
        if !backoff.is_finite() || backoff < 0.0 || backoff > self.retry.max_delay_secs as f64 {
            return fail(format!(
                "retry.backoff_factor_secs ({}) must be between 0 and retry.max_delay_secs ({})",
                backoff, self.retry.max_delay_secs
            ));
        }
        if !self
            .datastore
            .table_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return fail(format!(
                "datastore.table_prefix {:?} may only contain letters, digits and '_'",
                self.datastore.table_prefix
            ));
        }
        if self.datastore.record_types.is_empty() {
            return fail("datastore.record_types must not be empty".into());
        }
        if self.storage.bucket.is_empty() {
            return fail("storage.bucket must not be empty".into());
        }
        if self.storage.cdn_base_url.is_empty() {
            return fail("storage.cdn_base_url must not be empty".into());
        }
        if !self.keys.default_extension.starts_with('.') {
            return fail("keys.default_extension must start with '.'".into());
        }
        Ok(())
    }
}
