//! Snapshot file: the consolidated arena on disk.
//!
//! ```text
//! | magic (4) | total_nodes (4) | next_id (4) | nodes_to_load (4) | record * nodes_to_load |
//! ```
//!
//! Header fields are little-endian u32. `nodes_to_load` is authoritative;
//! `total_nodes` is informational. Records use the fixed layout from
//! [`crate::node`].
//!
//! A bad magic or a file too short for its header is fatal. A record that
//! fails validation is logged and skipped so the rest of the store stays
//! available.

use crate::arena::{NodeArena, CORRUPTION_ID_FACTOR};
use crate::error::{LatticeError, LatticeResult};
use crate::files::LatticeFiles;
use crate::node::{Node, RECORD_SIZE};
use crate::types::NodeId;
use lattice_storage::{write_file_atomic, FileBackend, StorageBackend};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// Magic number opening every snapshot ("LATT").
pub const SNAPSHOT_MAGIC: u32 = 0x4C41_5454;

/// Size of the snapshot header in bytes.
pub const SNAPSHOT_HEADER_SIZE: usize = 16;

/// The 16-byte snapshot header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    /// Logical record count when saved.
    pub total_nodes: u32,
    /// Next id to hand out. Greater than every stored id.
    pub next_id: u32,
    /// Number of records that follow.
    pub nodes_to_load: u32,
}

impl SnapshotHeader {
    /// Encodes the header.
    #[must_use]
    pub fn encode(&self) -> [u8; SNAPSHOT_HEADER_SIZE] {
        let mut buf = [0u8; SNAPSHOT_HEADER_SIZE];
        buf[0..4].copy_from_slice(&SNAPSHOT_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&self.total_nodes.to_le_bytes());
        buf[8..12].copy_from_slice(&self.next_id.to_le_bytes());
        buf[12..16].copy_from_slice(&self.nodes_to_load.to_le_bytes());
        buf
    }

    /// Decodes and validates the header at the start of `data`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if `data` is too short or the magic is wrong.
    pub fn decode(data: &[u8]) -> LatticeResult<Self> {
        if data.len() < SNAPSHOT_HEADER_SIZE {
            return Err(LatticeError::invalid_format(format!(
                "snapshot is {} bytes, shorter than its header",
                data.len()
            )));
        }
        let word = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);

        let magic = word(0);
        if magic != SNAPSHOT_MAGIC {
            return Err(LatticeError::invalid_format(format!(
                "bad snapshot magic {magic:#010x}, expected {SNAPSHOT_MAGIC:#010x}"
            )));
        }

        Ok(Self {
            total_nodes: word(4),
            next_id: word(8),
            nodes_to_load: word(12),
        })
    }
}

/// What a snapshot load found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotReport {
    /// Header, absent for a fresh lattice.
    pub header: Option<SnapshotHeader>,
    /// Records stored in the arena.
    pub loaded: u64,
    /// All-zero records.
    pub empty: u64,
    /// Records skipped because they failed validation.
    pub corrupt: u64,
    /// Whether the file ended before `nodes_to_load` records.
    pub truncated: bool,
}

/// An arena rebuilt from a snapshot.
#[derive(Debug)]
pub struct LoadedSnapshot {
    /// The rebuilt arena.
    pub arena: NodeArena,
    /// What was found.
    pub report: SnapshotReport,
}

/// Serializes every stored node of `arena`.
///
/// # Errors
///
/// Returns `InvalidArgument` if the id space no longer fits the u32 header,
/// or an error if a record cannot be encoded.
pub fn encode(arena: &NodeArena) -> LatticeResult<Vec<u8>> {
    let too_large = || LatticeError::invalid_argument("lattice exceeds snapshot header range");
    let next_id = u32::try_from(arena.next_id().as_u64()).map_err(|_| too_large())?;
    let total_nodes = u32::try_from(arena.len()).map_err(|_| too_large())?;
    let nodes_to_load = u32::try_from(arena.live_count()).map_err(|_| too_large())?;

    let header = SnapshotHeader {
        total_nodes,
        next_id,
        nodes_to_load,
    };

    let mut out = Vec::with_capacity(SNAPSHOT_HEADER_SIZE + arena.live_count() * RECORD_SIZE);
    out.extend_from_slice(&header.encode());
    let mut written = 0u32;
    for node in arena.iter() {
        out.extend_from_slice(&node.encode_record()?);
        written += 1;
    }

    // Records failing the corruption guard are not re-persisted.
    if written != nodes_to_load {
        out[12..16].copy_from_slice(&written.to_le_bytes());
    }
    Ok(out)
}

/// Rebuilds an arena from snapshot bytes. Empty input is a fresh lattice.
///
/// # Errors
///
/// Returns `InvalidFormat` for a short header or bad magic.
pub fn decode(data: &[u8], max_nodes: u64) -> LatticeResult<LoadedSnapshot> {
    let mut arena = NodeArena::new(max_nodes);
    let mut report = SnapshotReport::default();
    if data.is_empty() {
        return Ok(LoadedSnapshot { arena, report });
    }

    let header = SnapshotHeader::decode(data)?;
    report.header = Some(header);

    for index in 0..header.nodes_to_load as usize {
        let start = SNAPSHOT_HEADER_SIZE + index * RECORD_SIZE;
        let Some(record) = data.get(start..start + RECORD_SIZE) else {
            tracing::warn!(
                expected = header.nodes_to_load,
                found = index,
                "snapshot ends before its last record"
            );
            report.truncated = true;
            break;
        };

        match Node::decode_record(record) {
            Ok(None) => report.empty += 1,
            Ok(Some(node)) => {
                let id = node.id;
                match arena.insert(node) {
                    Ok(true) => report.loaded += 1,
                    Ok(false) => {
                        tracing::warn!(index, %id, "skipping duplicate snapshot record");
                        report.corrupt += 1;
                    }
                    Err(e) => {
                        tracing::warn!(index, %id, error = %e, "skipping corrupt snapshot record");
                        report.corrupt += 1;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(index, error = %e, "skipping corrupt snapshot record");
                report.corrupt += 1;
            }
        }
    }

    let last_reserved = u64::from(header.next_id).saturating_sub(1);
    if last_reserved > max_nodes.saturating_mul(CORRUPTION_ID_FACTOR) {
        tracing::warn!(next_id = header.next_id, "ignoring implausible snapshot next_id");
    } else if last_reserved > 0 {
        arena.reserve_through(NodeId::new(last_reserved));
    }
    if arena.next_id().as_u64() > u64::from(header.next_id) {
        tracing::warn!(
            header_next_id = header.next_id,
            next_id = arena.next_id().as_u64(),
            "snapshot next_id behind stored ids; using stored ids"
        );
    }

    Ok(LoadedSnapshot { arena, report })
}

#[derive(Debug)]
enum Target {
    File { path: PathBuf, temp: PathBuf },
    Memory(Mutex<Vec<u8>>),
}

/// Sizes of a completed save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveSummary {
    /// Records written.
    pub records: u64,
    /// Bytes written.
    pub bytes: u64,
}

/// Reads and atomically replaces the snapshot of one lattice.
#[derive(Debug)]
pub struct SnapshotManager {
    target: Target,
}

impl SnapshotManager {
    /// Manager for the snapshot file of `files`.
    #[must_use]
    pub fn for_files(files: &LatticeFiles) -> Self {
        Self {
            target: Target::File {
                path: files.snapshot_path().to_path_buf(),
                temp: files.temp_path(),
            },
        }
    }

    /// Manager keeping the snapshot in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            target: Target::Memory(Mutex::new(Vec::new())),
        }
    }

    /// Writes `arena` as the new snapshot.
    ///
    /// For files the bytes go to the staging file, are synced, and only then
    /// renamed over the previous snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or any I/O step fails. The previous
    /// snapshot is intact in that case.
    pub fn save(&self, arena: &NodeArena) -> LatticeResult<SaveSummary> {
        let bytes = encode(arena)?;
        let summary = SaveSummary {
            records: ((bytes.len() - SNAPSHOT_HEADER_SIZE) / RECORD_SIZE) as u64,
            bytes: bytes.len() as u64,
        };

        match &self.target {
            Target::File { path, temp } => write_file_atomic(path, temp, &bytes)?,
            Target::Memory(stored) => *stored.lock() = bytes,
        }

        Ok(summary)
    }

    /// Loads the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` for a bad header, or an I/O error.
    pub fn load(&self, max_nodes: u64) -> LatticeResult<LoadedSnapshot> {
        match &self.target {
            Target::File { path, .. } => read_file(path, max_nodes),
            Target::Memory(stored) => decode(&stored.lock(), max_nodes),
        }
    }
}

/// Loads the snapshot at `path`. A missing file is a fresh lattice.
///
/// # Errors
///
/// Returns `InvalidFormat` for a bad header, or an I/O error.
pub fn read_file(path: &Path, max_nodes: u64) -> LatticeResult<LoadedSnapshot> {
    if !path.exists() {
        return decode(&[], max_nodes);
    }
    let data = FileBackend::open_existing(path)?.read_all()?;
    decode(&data, max_nodes)
}
