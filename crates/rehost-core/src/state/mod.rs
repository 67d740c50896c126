//! Local run state: working set, checkpoint and audit logs.

pub mod atomic;
mod audit;
mod checkpoint;
mod idlist;

pub use audit::AuditLog;
pub use checkpoint::CheckpointStore;
pub use idlist::IdListStore;

use crate::config::StateConfig;
use crate::error::Result;
use crate::types::AssetRole;
use std::path::{Path, PathBuf};
use tracing::info;

/// All state files of one state directory.
#[derive(Debug, Clone)]
pub struct RunState {
    pub ids: IdListStore,
    pub checkpoint: CheckpointStore,
    audits: Vec<AuditLog>,
}

impl RunState {
    pub fn in_dir(state_dir: &Path) -> Self {
        Self {
            ids: IdListStore::new(state_dir.join(StateConfig::IDS_FILE)),
            checkpoint: CheckpointStore::new(state_dir.join(StateConfig::CHECKPOINT_FILE)),
            audits: AssetRole::ALL
                .iter()
                .map(|role| AuditLog::in_dir(*role, state_dir))
                .collect(),
        }
    }

    pub fn audit(&self, role: AssetRole) -> Option<&AuditLog> {
        self.audits.iter().find(|log| log.role() == role)
    }

    /// Back up and clear every state file before a fresh snapshot.
    pub fn reset(&self) -> Result<Vec<PathBuf>> {
        let mut backups = Vec::new();
        backups.extend(self.ids.rotate()?);
        backups.extend(self.checkpoint.backup()?);
        for log in &self.audits {
            backups.extend(log.backup()?);
        }
        if !backups.is_empty() {
            info!("Backed up {} state files", backups.len());
        }
        Ok(backups)
    }
}
