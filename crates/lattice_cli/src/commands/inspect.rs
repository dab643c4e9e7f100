//! Inspect command implementation.

use crate::commands::scan_wal;
use crate::error::CliResult;
use lattice_core::snapshot::{self, SnapshotHeader};
use lattice_core::wal::{WalItem, WalTail};
use lattice_core::{unix_now, wal_path_for, LicenseVerifier, PrefixIndex};
use serde::Serialize;
use std::path::Path;

/// Lattice inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Snapshot path.
    pub path: String,
    /// Snapshot size in bytes.
    pub snapshot_size: u64,
    /// WAL size in bytes.
    pub wal_size: u64,
    /// Ids handed out according to the header.
    pub header_total_nodes: Option<u32>,
    /// Next id according to the header.
    pub header_next_id: Option<u32>,
    /// Records loaded from the snapshot.
    pub snapshot_records: u64,
    /// Snapshot records that failed validation.
    pub corrupt_records: u64,
    /// Chunk heads among the loaded records.
    pub chunked_payloads: usize,
    /// Distinct names among the loaded records.
    pub names: usize,
    /// Valid WAL entries.
    pub wal_entries: usize,
    /// WAL frames that failed validation.
    pub wal_discarded: usize,
    /// How the WAL ends.
    pub wal_tail: String,
    /// Tier the configured license key resolves to.
    pub tier: String,
    /// Why the license key was rejected, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_rejection: Option<String>,
}

/// Describes how a WAL scan ended.
pub fn describe_tail(tail: &WalTail) -> String {
    match tail {
        WalTail::Clean => "clean".to_string(),
        WalTail::Torn { offset } => format!("torn at {offset}"),
        WalTail::Unreadable { offset, reason } => format!("unreadable at {offset}: {reason}"),
    }
}

/// Gathers the inspection result without modifying anything.
pub fn inspect(path: &Path, max_nodes: u64, license_key: Option<&str>) -> CliResult<InspectResult> {
    let loaded = snapshot::read_file(path, max_nodes)?;
    let header: Option<SnapshotHeader> = loaded.report.header;

    let mut index = PrefixIndex::new();
    let mut chunked_payloads = 0;
    for node in loaded.arena.iter() {
        if node.is_chunk_head() {
            chunked_payloads += 1;
        }
        if !node.is_chunk() {
            index.insert(&node.name, node.id);
        }
    }

    let (wal_size, wal_entries, wal_discarded, wal_tail) = match scan_wal(path)? {
        Some(scan) => {
            let entries = scan
                .items
                .iter()
                .filter(|item| matches!(item, WalItem::Entry { .. }))
                .count();
            (
                scan.size,
                entries,
                scan.items.len() - entries,
                describe_tail(&scan.tail),
            )
        }
        None => (0, 0, 0, "absent".to_string()),
    };

    let license = LicenseVerifier::product()?.resolve(license_key, unix_now());

    Ok(InspectResult {
        path: path.display().to_string(),
        snapshot_size: std::fs::metadata(path).map_or(0, |m| m.len()),
        wal_size,
        header_total_nodes: header.map(|h| h.total_nodes),
        header_next_id: header.map(|h| h.next_id),
        snapshot_records: loaded.report.loaded,
        corrupt_records: loaded.report.corrupt,
        chunked_payloads,
        names: index.len(),
        wal_entries,
        wal_discarded,
        wal_tail,
        tier: license.tier.to_string(),
        license_rejection: license.rejection,
    })
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    max_nodes: u64,
    license_key: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() && !wal_path_for(path).exists() {
        return Err(format!("No lattice found at {}", path.display()).into());
    }

    let result = inspect(path, max_nodes, license_key)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Lattice: {}", result.path);
    println!();
    println!("Files:");
    println!("  Snapshot: {} bytes", result.snapshot_size);
    println!("  WAL:      {} bytes", result.wal_size);
    println!();
    println!("Snapshot:");
    match (result.header_total_nodes, result.header_next_id) {
        (Some(total), Some(next)) => println!("  Header: {total} ids handed out, next id {next}"),
        _ => println!("  Header: none (fresh lattice)"),
    }
    println!("  Records:          {}", result.snapshot_records);
    println!("  Corrupt records:  {}", result.corrupt_records);
    println!("  Names:            {}", result.names);
    println!("  Chunked payloads: {}", result.chunked_payloads);
    println!();
    println!("WAL:");
    println!("  Entries:   {}", result.wal_entries);
    println!("  Discarded: {}", result.wal_discarded);
    println!("  Tail:      {}", result.wal_tail);
    println!();
    println!("License tier: {}", result.tier);
    if let Some(reason) = &result.license_rejection {
        println!("  Key rejected: {reason}");
    }
}
