//! CLI command implementations.
//!
//! The maintenance commands read the lattice files directly and never take
//! the writer lock or modify anything.

pub mod daemon;
pub mod dump_wal;
pub mod inspect;
pub mod verify;

use crate::error::CliResult;
use lattice_core::wal::{WalItem, WalManager, WalTail};
use lattice_core::wal_path_for;
use lattice_storage::FileBackend;
use std::path::Path;

/// Everything readable from a WAL file.
#[derive(Debug)]
pub struct WalScan {
    /// WAL size in bytes.
    pub size: u64,
    /// Entries and discarded frames in file order.
    pub items: Vec<WalItem>,
    /// How the scan ended.
    pub tail: WalTail,
}

/// Scans the WAL belonging to the snapshot at `path`. `None` if there is no
/// WAL file.
pub fn scan_wal(path: &Path) -> CliResult<Option<WalScan>> {
    let wal_path = wal_path_for(path);
    if !wal_path.exists() {
        return Ok(None);
    }

    let wal = WalManager::new(Box::new(FileBackend::open_existing(&wal_path)?), false, 0);
    let size = wal.size()?;
    let mut iter = wal.iter()?;
    let items = iter.by_ref().collect::<Result<Vec<_>, _>>()?;
    let tail = iter.tail().cloned().unwrap_or(WalTail::Clean);

    Ok(Some(WalScan { size, items, tail }))
}
