//! Atomic file operations for run state.
//!
//! Writes go through a temp file with a PID+TID suffix, are synced to disk
//! and then renamed over the target, so a crash never leaves a half-written
//! checkpoint or id list behind.

use crate::config::StateConfig;
use crate::error::{RehostError, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use tracing::debug;

/// Read a text file, returning `None` if it doesn't exist.
pub fn read_text(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(RehostError::Io {
            message: format!("Failed to read {}", path.display()),
            path: Some(path.to_path_buf()),
            source: Some(e),
        }),
    }
}

/// Replace `path` with `contents` atomically.
pub fn atomic_write_text(path: &Path, contents: &str) -> Result<()> {
    ensure_parent(path)?;

    let temp_path = temp_path_for(path);
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| RehostError::Io {
                message: format!("Failed to create temp file {}", temp_path.display()),
                path: Some(temp_path.clone()),
                source: Some(e),
            })?;

        file.write_all(contents.as_bytes())
            .and_then(|_| file.flush())
            .and_then(|_| file.sync_all())
            .map_err(|e| RehostError::Io {
                message: format!("Failed to write temp file {}", temp_path.display()),
                path: Some(temp_path.clone()),
                source: Some(e),
            })?;
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        RehostError::Io {
            message: format!(
                "Failed to rename {} to {}",
                temp_path.display(),
                path.display()
            ),
            path: Some(path.to_path_buf()),
            source: Some(e),
        }
    })?;

    debug!("Atomically wrote {}", path.display());
    Ok(())
}

/// Remove a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RehostError::io_with_path(e, path)),
    }
}

/// Move `path` aside to a timestamped sibling.
///
/// `ids.txt` becomes `ids-backup-20240131120000123.txt`. Returns the backup
/// location, or `None` when there was nothing to back up.
pub fn rotate_to_backup(path: &Path) -> Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }

    let backup = backup_path(path, &chrono::Local::now());
    fs::rename(path, &backup).map_err(|e| RehostError::io_with_path(e, path))?;
    debug!("Backed up {} to {}", path.display(), backup.display());
    Ok(Some(backup))
}

/// Timestamped backup name for `path` at `now`.
pub fn backup_path<Tz: chrono::TimeZone>(path: &Path, now: &chrono::DateTime<Tz>) -> PathBuf
where
    Tz::Offset: std::fmt::Display,
{
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let timestamp = now.format("%Y%m%d%H%M%S%3f");
    let name = match path.extension() {
        Some(ext) => format!(
            "{}-{}-{}.{}",
            stem,
            StateConfig::BACKUP_INFIX,
            timestamp,
            ext.to_string_lossy()
        ),
        None => format!("{}-{}-{}", stem, StateConfig::BACKUP_INFIX, timestamp),
    };
    path.with_file_name(name)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| RehostError::Io {
                message: format!("Failed to create directory {}", parent.display()),
                path: Some(parent.to_path_buf()),
                source: Some(e),
            })?;
        }
    }
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(
        ".{}.{}.{}.tmp",
        file_name,
        process::id(),
        thread_id()
    ))
}

fn thread_id() -> String {
    format!("{:?}", thread::current().id())
        .chars()
        .filter(char::is_ascii_digit)
        .collect()
}
