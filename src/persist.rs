//! Backup-rename document persistence.
//!
//! Every on-disk artifact (settings document, agent state document, vector
//! index pair) is replaced with the same protocol: move the current file to a
//! `.backup` sibling, write the new content, remove the backup on success.
//! On a write failure the backup is renamed back so the previous state
//! survives.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".backup");
    path.with_file_name(name)
}

fn persist_err(path: &Path, source: std::io::Error) -> Error {
    Error::Persist { path: path.to_path_buf(), source }
}

/// Atomically replaces the file at `path` with `bytes`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| persist_err(path, e))?;
        }
    }

    let backup = backup_path(path);
    let had_existing = path.exists();
    if had_existing {
        fs::rename(path, &backup).map_err(|e| persist_err(path, e))?;
    }

    match fs::write(path, bytes) {
        Ok(()) => {
            if had_existing {
                if let Err(e) = fs::remove_file(&backup) {
                    tracing::warn!(path = %backup.display(), error = %e, "failed to remove backup");
                }
            }
            Ok(())
        }
        Err(e) => {
            if had_existing {
                if let Err(restore_err) = fs::rename(&backup, path) {
                    tracing::error!(
                        path = %path.display(),
                        error = %restore_err,
                        "failed to restore backup after write failure"
                    );
                }
            }
            Err(persist_err(path, e))
        }
    }
}
