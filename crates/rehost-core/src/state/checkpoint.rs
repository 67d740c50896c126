//! Last committed chunk index.

use super::atomic;
use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::warn;

/// File-backed checkpoint holding the index of the last committed chunk.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last committed chunk, or `None` when there is nothing to resume.
    ///
    /// Unreadable or non-numeric content is treated as absent.
    pub fn read(&self) -> Option<usize> {
        let contents = match atomic::read_text(&self.path) {
            Ok(Some(contents)) => contents,
            Ok(None) => return None,
            Err(e) => {
                warn!("Checkpoint unreadable, starting from chunk 0: {}", e);
                return None;
            }
        };

        match contents.trim().parse::<usize>() {
            Ok(index) => Some(index),
            Err(_) => {
                warn!(
                    "Checkpoint {} holds {:?}, starting from chunk 0",
                    self.path.display(),
                    contents.trim()
                );
                None
            }
        }
    }

    /// Chunk index a run should start at.
    pub fn resume_point(&self) -> usize {
        self.read().map_or(0, |last| last + 1)
    }

    pub fn write(&self, chunk_index: usize) -> Result<()> {
        atomic::atomic_write_text(&self.path, &chunk_index.to_string())
    }

    pub fn clear(&self) -> Result<()> {
        atomic::remove_if_exists(&self.path)
    }

    pub fn backup(&self) -> Result<Option<PathBuf>> {
        atomic::rotate_to_backup(&self.path)
    }
}
