//! Backup and recovery for full rewrites
//!
//! A full rewrite moves the original file aside, streams the new layout to
//! a fresh file at the original path, and deletes the backup on success.
//! When anything fails after the original was disturbed, the backup is
//! renamed back so the pre-edit file is what remains on disk.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::core::error::{TagError, TagResult};
use crate::core::notification::NotificationLog;

/// Move the original aside and reopen it read-only.
///
/// The backup lands in `backup_dir` (the original's directory when not
/// configured) under the original name with a `.bak` suffix; a counter is
/// appended when that name is taken. Fails with `BackupIo` before anything
/// was modified, so the caller can propagate it without recovery.
pub fn create_backup(
    original_path: &Path,
    backup_dir: Option<&Path>,
) -> TagResult<(PathBuf, File)> {
    let dir = match backup_dir {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => original_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    let file_name = original_path
        .file_name()
        .ok_or_else(|| TagError::BackupIo(format!("{} has no file name", original_path.display())))?;

    let mut backup_path = dir.join(file_name);
    backup_path.set_extension(extension_with_suffix(original_path, None));
    let mut counter = 0u32;
    while backup_path.exists() {
        backup_path.set_extension(extension_with_suffix(original_path, Some(counter)));
        counter += 1;
    }

    fs::rename(original_path, &backup_path).map_err(|error| {
        TagError::BackupIo(format!(
            "unable to move {} to {}: {}",
            original_path.display(),
            backup_path.display(),
            error
        ))
    })?;
    tracing::debug!(backup = %backup_path.display(), "moved original aside");

    let backup_file = File::open(&backup_path).map_err(|error| {
        // get the original back before reporting; the rename succeeded so
        // this is best-effort
        let _ = fs::rename(&backup_path, original_path);
        TagError::BackupIo(format!(
            "unable to reopen backup {}: {}",
            backup_path.display(),
            error
        ))
    })?;
    Ok((backup_path, backup_file))
}

fn extension_with_suffix(original_path: &Path, counter: Option<u32>) -> String {
    let base = original_path
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = match counter {
        Some(counter) => format!("bak{}", counter),
        None => "bak".to_string(),
    };
    if base.is_empty() {
        suffix
    } else {
        format!("{}.{}", base, suffix)
    }
}

/// Rename the backup back over the original path.
pub fn restore(original_path: &Path, backup_path: &Path) -> TagResult<()> {
    if original_path.exists() {
        fs::remove_file(original_path).map_err(|error| {
            TagError::BackupIo(format!(
                "unable to remove partial output {}: {}",
                original_path.display(),
                error
            ))
        })?;
    }
    fs::rename(backup_path, original_path).map_err(|error| {
        TagError::BackupIo(format!(
            "unable to restore {} from {}: {}",
            original_path.display(),
            backup_path.display(),
            error
        ))
    })
}

/// Recovery path for errors raised after original bytes were disturbed:
/// restore the backup, record what happened, and wrap the cause so the
/// caller knows the persisted state is the pre-edit state.
pub fn handle_failure_after_modified(
    context: &str,
    original_path: &Path,
    backup_path: &Path,
    cause: TagError,
    log: &mut NotificationLog,
) -> TagError {
    match restore(original_path, backup_path) {
        Ok(()) => {
            log.critical(
                format!("{}; the original file has been restored", cause),
                context.to_string(),
            );
        }
        Err(restore_error) => {
            log.critical(
                format!(
                    "{}; restoring the original failed as well: {} (backup left at {})",
                    cause,
                    restore_error,
                    backup_path.display()
                ),
                context.to_string(),
            );
        }
    }
    TagError::RewriteFailed {
        context: context.to_string(),
        source: Box::new(cause),
    }
}
