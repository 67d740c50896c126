//! Persisted working set: one record id per line, in snapshot order.

use super::atomic;
use crate::error::{RehostError, Result};
use crate::types::RecordId;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct IdListStore {
    path: PathBuf,
}

impl IdListStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn save(&self, ids: &[RecordId]) -> Result<()> {
        let mut contents = String::with_capacity(ids.len() * 8);
        for id in ids {
            contents.push_str(&id.to_string());
            contents.push('\n');
        }
        atomic::atomic_write_text(&self.path, &contents)
    }

    /// Load the saved ids, or `None` if no snapshot was taken yet.
    pub fn load(&self) -> Result<Option<Vec<RecordId>>> {
        let Some(contents) = atomic::read_text(&self.path)? else {
            return Ok(None);
        };
        parse_ids(&contents).map(Some)
    }

    /// Move the id list aside to a timestamped backup.
    pub fn rotate(&self) -> Result<Option<PathBuf>> {
        atomic::rotate_to_backup(&self.path)
    }
}

fn parse_ids(contents: &str) -> Result<Vec<RecordId>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            line.trim()
                .parse::<RecordId>()
                .map_err(|e| RehostError::InvalidIdList {
                    line: index + 1,
                    message: format!("{:?}: {}", line.trim(), e),
                })
        })
        .collect()
}
