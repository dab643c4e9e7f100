//! On-disk layout and locking for one lattice.
//!
//! A lattice at `<path>` owns these siblings:
//!
//! ```text
//! <path>        # snapshot
//! <path>.wal    # write-ahead log
//! <path>.tmp    # staging file for atomic snapshot replacement
//! <path>.lock   # advisory lock for single-writer access
//! ```

use crate::error::{LatticeError, LatticeResult};
use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const WAL_SUFFIX: &str = ".wal";
const TEMP_SUFFIX: &str = ".tmp";
const LOCK_SUFFIX: &str = ".lock";

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Path of the WAL belonging to the snapshot at `path`.
#[must_use]
pub fn wal_path_for(path: &Path) -> PathBuf {
    sibling(path, WAL_SUFFIX)
}

/// File set of an open lattice, holding its exclusive lock.
///
/// The lock is released when this value is dropped.
#[derive(Debug)]
pub struct LatticeFiles {
    snapshot: PathBuf,
    _lock_file: File,
}

impl LatticeFiles {
    /// Locks the lattice at `path`, creating parent directories if allowed.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if neither snapshot nor WAL exists and
    /// `create_if_missing` is false, `LatticeLocked` if another handle holds
    /// the lock, or an I/O error.
    pub fn open(path: &Path, create_if_missing: bool) -> LatticeResult<Self> {
        if path.as_os_str().is_empty() {
            return Err(LatticeError::invalid_argument("empty lattice path"));
        }
        if path.is_dir() {
            return Err(LatticeError::invalid_argument(format!(
                "lattice path is a directory: {}",
                path.display()
            )));
        }

        let exists = path.exists() || wal_path_for(path).exists();
        if !exists {
            if !create_if_missing {
                return Err(LatticeError::NotFound {
                    path: path.display().to_string(),
                });
            }
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(sibling(path, LOCK_SUFFIX))?;

        // Non-blocking: a second writer fails fast.
        if lock_file.try_lock_exclusive().is_err() {
            return Err(LatticeError::LatticeLocked);
        }

        Ok(Self {
            snapshot: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot
    }

    /// Path of the WAL file.
    #[must_use]
    pub fn wal_path(&self) -> PathBuf {
        wal_path_for(&self.snapshot)
    }

    /// Path of the snapshot staging file.
    #[must_use]
    pub fn temp_path(&self) -> PathBuf {
        sibling(&self.snapshot, TEMP_SUFFIX)
    }

    /// Path of the lock file.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        sibling(&self.snapshot, LOCK_SUFFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sibling_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memory.lattice");
        let files = LatticeFiles::open(&path, true).unwrap();

        assert_eq!(files.snapshot_path(), path);
        assert_eq!(files.wal_path(), dir.path().join("memory.lattice.wal"));
        assert_eq!(files.temp_path(), dir.path().join("memory.lattice.tmp"));
        assert!(files.lock_path().exists());
    }

    #[test]
    fn second_open_is_locked_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memory.lattice");
        let _first = LatticeFiles::open(&path, true).unwrap();

        assert!(matches!(
            LatticeFiles::open(&path, true),
            Err(LatticeError::LatticeLocked)
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memory.lattice");
        drop(LatticeFiles::open(&path, true).unwrap());
        assert!(LatticeFiles::open(&path, true).is_ok());
    }

    #[test]
    fn missing_lattice_without_create() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.lattice");
        assert!(matches!(
            LatticeFiles::open(&path, false),
            Err(LatticeError::NotFound { .. })
        ));
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agents").join("a1").join("memory.lattice");
        LatticeFiles::open(&path, true).unwrap();
        assert!(path.parent().unwrap().is_dir());
    }
}
