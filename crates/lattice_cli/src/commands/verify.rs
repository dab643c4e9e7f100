//! Verify command implementation.

use crate::commands::inspect::describe_tail;
use crate::commands::scan_wal;
use crate::error::{CliError, CliResult};
use lattice_core::chunk;
use lattice_core::snapshot;
use lattice_core::wal::{WalItem, WalTail};
use serde::Serialize;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default, Serialize)]
pub struct VerifyResult {
    /// Snapshot records that passed their checksum.
    pub snapshot_records: u64,
    /// Snapshot records that failed validation.
    pub corrupt_records: u64,
    /// Whether the snapshot ended early.
    pub snapshot_truncated: bool,
    /// Valid WAL entries.
    pub wal_entries: usize,
    /// WAL frames that failed validation.
    pub wal_discarded: usize,
    /// How the WAL ends.
    pub wal_tail: String,
    /// Chunked payloads checked.
    pub chunked_payloads: usize,
    /// Problems found.
    pub errors: Vec<String>,
    /// Recoverable findings, such as a torn WAL tail.
    pub warnings: Vec<String>,
}

impl VerifyResult {
    /// Returns true if nothing failed validation.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks the snapshot header and every record checksum, every WAL frame, and
/// every chunked payload after WAL replay. Nothing is modified.
pub fn verify(path: &Path, max_nodes: u64) -> CliResult<VerifyResult> {
    let mut result = VerifyResult::default();

    let loaded = snapshot::read_file(path, max_nodes)?;
    let mut arena = loaded.arena;
    result.snapshot_records = loaded.report.loaded;
    result.corrupt_records = loaded.report.corrupt;
    result.snapshot_truncated = loaded.report.truncated;
    if loaded.report.corrupt > 0 {
        result
            .errors
            .push(format!("{} snapshot records failed validation", loaded.report.corrupt));
    }
    if loaded.report.truncated {
        result.errors.push("snapshot ends before its last record".into());
    }

    result.wal_tail = "absent".into();
    if let Some(scan) = scan_wal(path)? {
        result.wal_tail = describe_tail(&scan.tail);
        match &scan.tail {
            WalTail::Clean => {}
            WalTail::Torn { offset } => result
                .warnings
                .push(format!("WAL tail torn at offset {offset}; recovery will cut it")),
            WalTail::Unreadable { offset, reason } => result
                .errors
                .push(format!("WAL unreadable at offset {offset}: {reason}")),
        }

        for item in scan.items {
            match item {
                WalItem::Entry { entry, .. } => {
                    result.wal_entries += 1;
                    if !arena.contains(entry.node.id) {
                        if let Err(e) = arena.insert(entry.node) {
                            result.errors.push(format!("WAL entry {}: {e}", entry.sequence));
                        }
                    }
                }
                WalItem::Discarded { offset, error } => {
                    result.wal_discarded += 1;
                    result.errors.push(format!("WAL frame at offset {offset}: {error}"));
                }
            }
        }
    }

    let heads: Vec<_> = arena
        .iter()
        .filter(|n| n.is_chunk_head())
        .map(|n| n.id)
        .collect();
    result.chunked_payloads = heads.len();
    for id in heads {
        if let Err(e) = chunk::reassemble(&arena, id) {
            result.errors.push(e.to_string());
        }
    }

    Ok(result)
}

/// Runs the verify command.
pub fn run(path: &Path, max_nodes: u64, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = verify(path, max_nodes)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(path, &result),
    }

    if result.is_ok() {
        Ok(())
    } else {
        Err(CliError::Verification(format!("{} problems found", result.errors.len())).into())
    }
}

fn print_text_output(path: &Path, result: &VerifyResult) {
    println!("Verifying lattice at {}", path.display());
    println!();
    println!(
        "  Snapshot records checked: {}, corrupt: {}",
        result.snapshot_records + result.corrupt_records,
        result.corrupt_records
    );
    println!(
        "  WAL entries: {}, discarded: {}, tail: {}",
        result.wal_entries, result.wal_discarded, result.wal_tail
    );
    println!("  Chunked payloads checked: {}", result.chunked_payloads);
    for warning in &result.warnings {
        println!("    WARNING: {warning}");
    }
    for error in &result.errors {
        println!("    ERROR: {error}");
    }
    println!();
    if result.is_ok() {
        println!("Lattice verification passed");
    } else {
        println!("Lattice verification failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::{wal_path_for, Config, Lattice, NodeKind};
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::tempdir;

    fn build(path: &Path) {
        let lattice = Lattice::open(path, Config::default()).unwrap();
        lattice.add_node("a", b"1", NodeKind::Primitive).unwrap();
        lattice
            .add_node_chunked("doc", &[3u8; 1200], NodeKind::Primitive)
            .unwrap();
        lattice.save().unwrap();
        lattice.add_node("b", b"2", NodeKind::Primitive).unwrap();
    }

    #[test]
    fn healthy_lattice_passes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agent.lattice");
        build(&path);

        let result = verify(&path, 1000).unwrap();
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(result.snapshot_records, 5);
        assert_eq!(result.wal_entries, 6);
        assert_eq!(result.chunked_payloads, 1);
    }

    #[test]
    fn torn_wal_tail_is_only_a_warning() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agent.lattice");
        build(&path);
        OpenOptions::new()
            .append(true)
            .open(wal_path_for(&path))
            .unwrap()
            .write_all(b"LWAL\x01")
            .unwrap();

        let result = verify(&path, 1000).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn corrupt_snapshot_record_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agent.lattice");
        build(&path);

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[16 + 300] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let result = verify(&path, 1000).unwrap();
        assert!(!result.is_ok());
        assert_eq!(result.corrupt_records, 1);
    }
}
