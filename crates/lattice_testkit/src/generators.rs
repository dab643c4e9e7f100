//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that stays within the record limits.

use lattice_core::{Lattice, LatticeResult, NodeKind, NAME_CAPACITY, PAYLOAD_CAPACITY};
use proptest::prelude::*;

/// Strategy for generating short `Namespace:topic:item` names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z]:[a-z]{1,3}:[a-z0-9_]{1,12}").expect("Invalid regex")
}

/// Strategy for generating names of any length the record accepts.
pub fn long_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex(&format!("[a-zA-Z0-9:_./-]{{1,{NAME_CAPACITY}}}"))
        .expect("Invalid regex")
}

/// Strategy for generating a prefix made of name segments.
pub fn prefix_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z]:([a-z]{1,3}:)?").expect("Invalid regex")
}

/// Strategy for generating payloads that fit inline.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=PAYLOAD_CAPACITY)
}

/// Strategy for generating payloads that need several chunks.
pub fn chunked_payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), PAYLOAD_CAPACITY + 1..4 * PAYLOAD_CAPACITY)
}

/// Strategy for generating node kinds, custom tags included.
pub fn kind_strategy() -> impl Strategy<Value = NodeKind> {
    prop_oneof![
        Just(NodeKind::Primitive),
        Just(NodeKind::Pattern),
        Just(NodeKind::Learning),
        Just(NodeKind::AntiPattern),
        (4u32..1000).prop_map(NodeKind::Custom),
    ]
}

/// One step of a generated workload.
#[derive(Debug, Clone)]
pub enum LatticeOp {
    /// Inline add
    Add {
        /// Node name
        name: String,
        /// Payload
        payload: Vec<u8>,
        /// Kind tag
        kind: NodeKind,
    },
    /// Chunked add
    AddChunked {
        /// Node name
        name: String,
        /// Payload
        payload: Vec<u8>,
    },
    /// WAL flush
    Flush,
    /// Snapshot without WAL truncation
    Save,
    /// Snapshot and WAL truncation
    Checkpoint,
}

impl LatticeOp {
    /// Applies the step to `lattice`.
    pub fn apply(&self, lattice: &Lattice) -> LatticeResult<()> {
        match self {
            Self::Add {
                name,
                payload,
                kind,
            } => lattice.add_node(name, payload, *kind).map(|_| ()),
            Self::AddChunked { name, payload } => lattice
                .add_node_chunked(name, payload, NodeKind::Learning)
                .map(|_| ()),
            Self::Flush => lattice.flush(),
            Self::Save => lattice.save(),
            Self::Checkpoint => lattice.checkpoint(),
        }
    }
}

/// Strategy for generating a single operation. Writes dominate.
pub fn op_strategy() -> impl Strategy<Value = LatticeOp> {
    prop_oneof![
        8 => (name_strategy(), payload_strategy(), kind_strategy())
            .prop_map(|(name, payload, kind)| LatticeOp::Add { name, payload, kind }),
        2 => (name_strategy(), chunked_payload_strategy())
            .prop_map(|(name, payload)| LatticeOp::AddChunked { name, payload }),
        1 => Just(LatticeOp::Flush),
        1 => Just(LatticeOp::Save),
        1 => Just(LatticeOp::Checkpoint),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn op_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<LatticeOp>> {
    prop::collection::vec(op_strategy(), 1..max_len)
}

/// Strategy for generating `(name, payload)` pairs with distinct names.
pub fn distinct_records_strategy(max: usize) -> impl Strategy<Value = Vec<(String, Vec<u8>)>> {
    prop::collection::btree_map(name_strategy(), payload_strategy(), 1..max)
        .prop_map(|map| map.into_iter().collect())
}
