//! Type definitions for FFI.

use crate::buffer::LatticeBuffer;
use lattice_core::{Node, NodeLink, StatsSnapshot};

/// An opaque lattice handle.
///
/// Never dereference or modify directly.
#[repr(C)]
pub struct LatticeHandle {
    _private: [u8; 0],
}

/// Record is a standalone node.
pub const LATTICE_LINK_INLINE: u8 = 0;
/// Record is the head of a chunked payload.
pub const LATTICE_LINK_CHUNK_HEAD: u8 = 1;
/// Record is one chunk of a chunked payload.
pub const LATTICE_LINK_CHUNK: u8 = 2;

/// A node returned to the caller.
///
/// Release with `lattice_free_node`.
#[repr(C)]
#[derive(Debug)]
pub struct LatticeNode {
    /// Node id.
    pub id: u64,
    /// Node kind code.
    pub kind: u32,
    /// One of the `LATTICE_LINK_*` constants.
    pub link: u8,
    /// Full payload length for chunk heads, inline payload length otherwise.
    pub total_len: u32,
    /// UTF-8 name, not null-terminated.
    pub name: LatticeBuffer,
    /// Inline payload. Empty for chunk heads.
    pub payload: LatticeBuffer,
}

impl LatticeNode {
    /// Converts a node, moving its name and payload into owned buffers.
    pub fn from_node(node: Node) -> Self {
        let (link, total_len) = match node.link {
            NodeLink::Inline => (LATTICE_LINK_INLINE, node.payload.len() as u32),
            NodeLink::ChunkHead { total_len, .. } => (LATTICE_LINK_CHUNK_HEAD, total_len),
            NodeLink::Chunk { .. } => (LATTICE_LINK_CHUNK, node.payload.len() as u32),
        };
        Self {
            id: node.id.as_u64(),
            kind: node.kind.as_u32(),
            link,
            total_len,
            name: LatticeBuffer::from_vec(node.name.into_bytes()),
            payload: LatticeBuffer::from_vec(node.payload),
        }
    }

    /// A zeroed node with no allocations.
    pub fn empty() -> Self {
        Self {
            id: 0,
            kind: 0,
            link: LATTICE_LINK_INLINE,
            total_len: 0,
            name: LatticeBuffer::empty(),
            payload: LatticeBuffer::empty(),
        }
    }

    pub(crate) unsafe fn release(self) {
        self.name.release();
        self.payload.release();
    }
}

/// An array of nodes.
///
/// Release with `lattice_free_node_list`.
#[repr(C)]
#[derive(Debug)]
pub struct LatticeNodeList {
    /// Pointer to the first node.
    pub nodes: *mut LatticeNode,
    /// Number of nodes.
    pub len: usize,
    /// Capacity (for internal use).
    pub capacity: usize,
}

impl LatticeNodeList {
    /// Builds a list from nodes.
    pub fn from_nodes(nodes: Vec<Node>) -> Self {
        let converted: Vec<LatticeNode> = nodes.into_iter().map(LatticeNode::from_node).collect();
        let mut boxed = converted.into_boxed_slice();
        let ptr = boxed.as_mut_ptr();
        let len = boxed.len();
        std::mem::forget(boxed);
        Self {
            nodes: ptr,
            len,
            capacity: len,
        }
    }

    /// An empty list.
    pub fn empty() -> Self {
        Self {
            nodes: std::ptr::null_mut(),
            len: 0,
            capacity: 0,
        }
    }

    pub(crate) unsafe fn release(self) {
        if self.nodes.is_null() {
            return;
        }
        for node in Vec::from_raw_parts(self.nodes, self.len, self.capacity) {
            node.release();
        }
    }
}

/// Statistics snapshot.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct LatticeStats {
    /// Inline adds.
    pub adds: u64,
    /// Chunked adds.
    pub chunked_adds: u64,
    /// Node reads.
    pub reads: u64,
    /// Prefix queries.
    pub prefix_queries: u64,
    /// Index keys examined by prefix queries.
    pub index_keys_visited: u64,
    /// Payload bytes written.
    pub bytes_written: u64,
    /// Payload bytes read.
    pub bytes_read: u64,
    /// WAL entries written.
    pub wal_entries_written: u64,
    /// WAL entries replayed at open.
    pub wal_entries_replayed: u64,
    /// WAL entries discarded at open.
    pub wal_entries_discarded: u64,
    /// Corrupt snapshot records skipped at open.
    pub corrupt_records_skipped: u64,
    /// Adds refused by the tier ceiling.
    pub tier_rejections: u64,
    /// Adds refused by physical capacity.
    pub capacity_rejections: u64,
    /// Checkpoints.
    pub checkpoints: u64,
    /// Snapshot saves, checkpoints included.
    pub saves: u64,
    /// Ids handed out, chunk records included.
    pub node_count: u64,
}

impl LatticeStats {
    /// Combines a stats snapshot with the node count.
    pub fn from_snapshot(s: StatsSnapshot, node_count: u64) -> Self {
        Self {
            adds: s.adds,
            chunked_adds: s.chunked_adds,
            reads: s.reads,
            prefix_queries: s.prefix_queries,
            index_keys_visited: s.index_keys_visited,
            bytes_written: s.bytes_written,
            bytes_read: s.bytes_read,
            wal_entries_written: s.wal_entries_written,
            wal_entries_replayed: s.wal_entries_replayed,
            wal_entries_discarded: s.wal_entries_discarded,
            corrupt_records_skipped: s.corrupt_records_skipped,
            tier_rejections: s.tier_rejections,
            capacity_rejections: s.capacity_rejections,
            checkpoints: s.checkpoints,
            saves: s.saves,
            node_count,
        }
    }
}
