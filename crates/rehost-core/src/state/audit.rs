//! Append-only CSV logs of every attempted reference rewrite.
//!
//! One file per role with the header `id,old,new`. Rows of a missing asset
//! carry `old == new`; skipped assets never appear.

use super::atomic;
use crate::error::{RehostError, Result};
use crate::types::{AuditRow, AssetRole};
use crate::config::StateConfig;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

const HEADER: &str = "id,old,new";

#[derive(Debug, Clone)]
pub struct AuditLog {
    role: AssetRole,
    path: PathBuf,
}

impl AuditLog {
    pub fn new(role: AssetRole, path: impl Into<PathBuf>) -> Self {
        Self {
            role,
            path: path.into(),
        }
    }

    /// Log for `role` at its standard name inside `state_dir`.
    pub fn in_dir(role: AssetRole, state_dir: &Path) -> Self {
        Self::new(role, state_dir.join(file_name(role)))
    }

    pub fn role(&self) -> AssetRole {
        self.role
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append rows, writing the header first if the file is new or empty.
    pub fn append(&self, rows: &[AuditRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let needs_header = std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| RehostError::io_with_path(e, &self.path))?;

        let mut buffer = String::new();
        if needs_header {
            buffer.push_str(HEADER);
            buffer.push('\n');
        }
        for row in rows {
            buffer.push_str(&format_row(row));
            buffer.push('\n');
        }

        file.write_all(buffer.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| RehostError::io_with_path(e, &self.path))
    }

    /// Move the current log aside so the next append starts a fresh file.
    pub fn backup(&self) -> Result<Option<PathBuf>> {
        atomic::rotate_to_backup(&self.path)
    }
}

fn file_name(role: AssetRole) -> &'static str {
    match role {
        AssetRole::Attachment => StateConfig::AUDIT_ATTACHMENT_FILE,
        AssetRole::Content => StateConfig::AUDIT_CONTENT_FILE,
        AssetRole::Metadata => StateConfig::AUDIT_METADATA_FILE,
    }
}

fn format_row(row: &AuditRow) -> String {
    format!("{},{},{}", row.id, quote(&row.old), quote(&row.new))
}

/// RFC 4180 field quoting.
fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
