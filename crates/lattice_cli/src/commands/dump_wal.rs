//! Dump-wal command implementation.

use crate::commands::inspect::describe_tail;
use crate::commands::scan_wal;
use crate::error::{CliError, CliResult};
use lattice_core::wal::WalItem;
use lattice_core::NodeLink;
use serde::Serialize;
use std::path::Path;

/// WAL frame representation for output.
#[derive(Debug, Serialize)]
pub struct WalFrameInfo {
    /// Offset in the WAL file.
    pub offset: u64,
    /// `add`, `update`, or `discarded`.
    pub operation: String,
    /// Sequence number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// Node id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<u64>,
    /// Node name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Node kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// `inline`, `chunk-head` or `chunk`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Inline payload size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_size: Option<usize>,
    /// Why the frame was discarded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WalFrameInfo {
    fn from_item(item: WalItem) -> Self {
        match item {
            WalItem::Entry { offset, entry } => {
                let link = match entry.node.link {
                    NodeLink::Inline => "inline",
                    NodeLink::ChunkHead { .. } => "chunk-head",
                    NodeLink::Chunk { .. } => "chunk",
                };
                Self {
                    offset,
                    operation: entry.operation.name().to_string(),
                    sequence: Some(entry.sequence.as_u64()),
                    node_id: Some(entry.node.id.as_u64()),
                    kind: Some(entry.node.kind.to_string()),
                    link: Some(link.to_string()),
                    payload_size: Some(entry.node.payload.len()),
                    name: Some(entry.node.name),
                    error: None,
                }
            }
            WalItem::Discarded { offset, error } => Self {
                offset,
                operation: "discarded".to_string(),
                sequence: None,
                node_id: None,
                name: None,
                kind: None,
                link: None,
                payload_size: None,
                error: Some(error.to_string()),
            },
        }
    }
}

/// Frames at or after `start_offset`, at most `limit` of them, and the tail
/// description.
pub fn read_frames(
    path: &Path,
    start_offset: u64,
    limit: Option<usize>,
) -> CliResult<(Vec<WalFrameInfo>, String)> {
    let scan = scan_wal(path)?
        .ok_or_else(|| CliError::NotFound(format!("no WAL next to {}", path.display())))?;

    let frames = scan
        .items
        .into_iter()
        .map(WalFrameInfo::from_item)
        .filter(|f| f.offset >= start_offset)
        .take(limit.unwrap_or(usize::MAX))
        .collect();
    Ok((frames, describe_tail(&scan.tail)))
}

/// Runs the dump-wal command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    start_offset: u64,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let (frames, tail) = read_frames(path, start_offset, limit)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&frames)?),
        _ => print_text_output(&frames, &tail),
    }
    Ok(())
}

fn print_text_output(frames: &[WalFrameInfo], tail: &str) {
    println!("WAL frames ({} shown):", frames.len());
    println!();

    for frame in frames {
        match &frame.error {
            Some(error) => println!("{:>8}  DISCARDED  {error}", frame.offset),
            None => println!(
                "{:>8}  {:<7} seq={:<6} id={:<6} {:<10} {:<11} {} ({} bytes)",
                frame.offset,
                frame.operation.to_uppercase(),
                frame.sequence.unwrap_or_default(),
                frame.node_id.unwrap_or_default(),
                frame.kind.as_deref().unwrap_or("-"),
                frame.link.as_deref().unwrap_or("-"),
                frame.name.as_deref().unwrap_or(""),
                frame.payload_size.unwrap_or_default(),
            ),
        }
    }

    println!();
    println!("Tail: {tail}");
}
