//! Deterministic storage key derivation.
//!
//! Keys look like `{root}/{category...}/{name}[-{tag}]-{seq:03}{ext}` and
//! depend only on the record's name, its resolved category path, the asset
//! role and the role-scoped sequence number.

use crate::config::KeyConfig;
use crate::error::{RehostError, Result};
use crate::types::{AssetRole, RecordId};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

/// Everything outside letters, digits, `-`, `_` and `.`.
static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9\-_.]").unwrap());

/// Strip every character that is not safe in a key segment.
///
/// # Examples
///
/// ```
/// use rehost::keys::sanitize_segment;
///
/// assert_eq!(sanitize_segment("Chair & Table"), "ChairTable");
/// assert_eq!(sanitize_segment("model_v1.2"), "model_v1.2");
/// ```
pub fn sanitize_segment(segment: &str) -> String {
    UNSAFE_CHARS.replace_all(segment, "").into_owned()
}

/// Join the root label with the sanitized category path.
pub fn derive_prefix(root: &str, category_path: &[String]) -> String {
    std::iter::once(root)
        .chain(category_path.iter().map(String::as_str))
        .map(sanitize_segment)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Sanitized record name, falling back to the id when nothing survives.
pub fn safe_name(record_id: RecordId, display_name: &str) -> String {
    let name = sanitize_segment(display_name);
    if name.is_empty() {
        record_id.to_string()
    } else {
        name
    }
}

/// Build the full object key for one asset.
pub fn derive_key(prefix: &str, safe_name: &str, role: AssetRole, seq: u32, ext: &str) -> String {
    let stem = match role.tag() {
        "" => format!("{}-{:03}", safe_name, seq),
        tag => format!("{}-{}-{:03}", safe_name, tag, seq),
    };
    if prefix.is_empty() {
        format!("{}{}", stem, ext)
    } else {
        format!("{}/{}{}", prefix, stem, ext)
    }
}

/// Hands out 1-based, gapless sequence numbers per (record, role).
#[derive(Debug, Default)]
pub struct SequenceCounter {
    next: HashMap<(RecordId, AssetRole), u32>,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, record_id: RecordId, role: AssetRole) -> u32 {
        let slot = self.next.entry((record_id, role)).or_insert(1);
        let seq = *slot;
        *slot += 1;
        seq
    }
}

/// Why an asset was not scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    DeadHost(String),
    DisallowedExtension(String),
    InvalidUrl,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::DeadHost(host) => write!(f, "dead host {}", host),
            SkipReason::DisallowedExtension(ext) => write!(f, "extension {} not allowed", ext),
            SkipReason::InvalidUrl => f.write_str("unparseable url"),
        }
    }
}

/// Decides whether a source URL is migrated and with which extension.
#[derive(Debug, Clone)]
pub struct ExtensionPolicy {
    allowed: HashSet<String>,
    default_extension: String,
    special_cases: Vec<Regex>,
    dead_hosts: Vec<String>,
}

impl ExtensionPolicy {
    pub fn from_config(config: &KeyConfig) -> Result<Self> {
        let special_cases = config
            .special_case_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| RehostError::Config {
                    message: format!("Invalid special-case pattern {:?}: {}", pattern, e),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            allowed: config
                .allowed_extensions
                .iter()
                .map(|ext| normalize_extension(ext))
                .collect(),
            default_extension: normalize_extension(&config.default_extension),
            special_cases,
            dead_hosts: config
                .dead_hosts
                .iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        })
    }

    /// Resolve the key extension for `source_url`, or say why it is skipped.
    pub fn resolve(&self, source_url: &str) -> std::result::Result<String, SkipReason> {
        let url = url::Url::parse(source_url.trim()).map_err(|_| SkipReason::InvalidUrl)?;
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();

        if self.is_dead_host(&host) {
            return Err(SkipReason::DeadHost(host));
        }

        let extension = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .and_then(|file| file.rfind('.').map(|dot| &file[dot..]))
            .filter(|ext| ext.len() > 1)
            .map(normalize_extension);

        match extension {
            None => Ok(self.default_extension.clone()),
            Some(ext) if self.allowed.contains(&ext) => Ok(ext),
            Some(ext) => {
                if self.special_cases.iter().any(|re| re.is_match(source_url)) {
                    Ok(self.default_extension.clone())
                } else {
                    Err(SkipReason::DisallowedExtension(ext))
                }
            }
        }
    }

    fn is_dead_host(&self, host: &str) -> bool {
        self.dead_hosts.iter().any(|dead| {
            host == dead
                || host
                    .strip_suffix(dead.as_str())
                    .is_some_and(|rest| rest.ends_with('.'))
        })
    }
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}
