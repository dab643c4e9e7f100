//! Crash-safe whole-file replacement.
//!
//! Snapshots are rewritten in full on every save. Writing them in place would
//! leave a torn file if the process died halfway, so the bytes go to a sibling
//! temporary file first:
//!
//! 1. write the temporary file
//! 2. `sync_all` it
//! 3. rename it over the target
//! 4. fsync the parent directory so the rename itself is durable
//!
//! A crash before step 3 leaves the previous target untouched; a crash after
//! it leaves the new one.

use crate::error::StorageResult;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Atomically replaces `target` with `data`, staging through `temp`.
///
/// `temp` must live on the same filesystem as `target`.
///
/// # Errors
///
/// Returns an error if any write, sync or rename step fails. The previous
/// contents of `target` are intact in that case.
pub fn write_file_atomic(target: &Path, temp: &Path, data: &[u8]) -> StorageResult<()> {
    let mut file = File::create(temp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(temp, target)?;
    sync_parent_dir(target)?;

    tracing::trace!(path = %target.display(), bytes = data.len(), "replaced file atomically");
    Ok(())
}

/// Fsyncs the directory containing `path`.
///
/// On Windows this is a no-op; NTFS journals metadata updates itself.
///
/// # Errors
///
/// Returns an error if the directory cannot be opened or synced.
#[cfg(unix)]
pub fn sync_parent_dir(path: &Path) -> StorageResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()?;
    Ok(())
}

/// Fsyncs the directory containing `path`.
///
/// On Windows this is a no-op; NTFS journals metadata updates itself.
///
/// # Errors
///
/// Never fails on this platform.
#[cfg(not(unix))]
pub fn sync_parent_dir(_path: &Path) -> StorageResult<()> {
    Ok(())
}
