//! Chunk codec: payloads larger than one record.
//!
//! A chunked payload is stored as a head record carrying the name, the total
//! length and the chunk count, followed by `ceil(len / 511)` chunk records at
//! the ids right after the head. Each chunk carries its slice, its position
//! and the head's id. Only this module interprets chunk records.

use crate::arena::NodeArena;
use crate::error::{LatticeError, LatticeResult};
use crate::node::{Node, NodeLink, PAYLOAD_CAPACITY};
use crate::types::{NodeId, NodeKind};

/// Payload bytes carried by each chunk record.
pub const CHUNK_PAYLOAD_SIZE: usize = PAYLOAD_CAPACITY;

/// Number of chunk records needed for `len` bytes.
#[must_use]
pub fn chunk_count(len: usize) -> usize {
    len.div_ceil(CHUNK_PAYLOAD_SIZE)
}

/// Splits `bytes` into a head node and its chunk nodes, ids starting at
/// `head_id`. The head comes first.
///
/// # Errors
///
/// Returns `NameTooLong` or `InvalidArgument` if the payload length does not
/// fit the head's u32 fields.
pub fn split(head_id: NodeId, name: &str, kind: NodeKind, bytes: &[u8]) -> LatticeResult<Vec<Node>> {
    Node::check_fits(name, &[])?;
    let total_len = u32::try_from(bytes.len())
        .map_err(|_| LatticeError::invalid_argument("chunked payload exceeds 4 GiB"))?;
    let count = chunk_count(bytes.len());
    let chunk_count = u32::try_from(count)
        .map_err(|_| LatticeError::invalid_argument("too many chunks"))?;

    let mut nodes = Vec::with_capacity(count + 1);
    nodes.push(Node {
        id: head_id,
        kind,
        name: name.to_string(),
        payload: Vec::new(),
        link: NodeLink::ChunkHead {
            total_len,
            chunk_count,
        },
    });

    for (index, slice) in bytes.chunks(CHUNK_PAYLOAD_SIZE).enumerate() {
        nodes.push(Node {
            id: NodeId::new(head_id.as_u64() + 1 + index as u64),
            kind,
            name: String::new(),
            payload: slice.to_vec(),
            link: NodeLink::Chunk {
                parent_id: head_id,
                sequence_index: index as u32,
            },
        });
    }

    Ok(nodes)
}

/// Reassembles the payload stored under `head_id`.
///
/// Returns `Ok(None)` if no record exists at `head_id`. An inline record
/// yields its own payload.
///
/// # Errors
///
/// Returns `ChunkIntegrity` if a chunk is missing, belongs to another head,
/// is out of order, or the total length does not match. Returns
/// `InvalidArgument` if `head_id` names a chunk record.
pub fn reassemble(arena: &NodeArena, head_id: NodeId) -> LatticeResult<Option<Vec<u8>>> {
    let Some(head) = arena.get(head_id) else {
        return Ok(None);
    };

    let (total_len, chunk_count) = match head.link {
        NodeLink::Inline => return Ok(Some(head.payload.clone())),
        NodeLink::Chunk { .. } => {
            return Err(LatticeError::invalid_argument(format!(
                "node {head_id} is a chunk, not a chunk head"
            )))
        }
        NodeLink::ChunkHead {
            total_len,
            chunk_count,
        } => (total_len as usize, chunk_count),
    };

    let mut out = Vec::with_capacity(total_len);
    for expected_index in 0..chunk_count {
        let id = NodeId::new(head_id.as_u64() + 1 + u64::from(expected_index));
        let chunk = arena.get(id).ok_or_else(|| {
            LatticeError::chunk_integrity(
                head_id.as_u64(),
                format!("chunk {expected_index} missing (id {id})"),
            )
        })?;

        match chunk.link {
            NodeLink::Chunk {
                parent_id,
                sequence_index,
            } if parent_id == head_id && sequence_index == expected_index => {}
            NodeLink::Chunk {
                parent_id,
                sequence_index,
            } => {
                return Err(LatticeError::chunk_integrity(
                    head_id.as_u64(),
                    format!(
                        "id {id} holds chunk {sequence_index} of node {parent_id}, expected chunk {expected_index}"
                    ),
                ))
            }
            _ => {
                return Err(LatticeError::chunk_integrity(
                    head_id.as_u64(),
                    format!("id {id} is not a chunk record"),
                ))
            }
        }

        out.extend_from_slice(&chunk.payload);
    }

    if out.len() != total_len {
        return Err(LatticeError::chunk_integrity(
            head_id.as_u64(),
            format!("reassembled {} bytes, head records {total_len}", out.len()),
        ));
    }

    Ok(Some(out))
}
