//! Node arena: id-addressed record storage.
//!
//! Slot `id - 1` holds node `id`, so lookups are a single index. A slot can
//! be empty when a record was lost to corruption or a chunked write never
//! committed its head; such ids are never handed out again.

use crate::error::{LatticeError, LatticeResult};
use crate::node::{Node, NodeLink};
use crate::types::{NodeId, NodeKind};

/// Records whose id exceeds `max_nodes` times this factor are treated as
/// corrupt rather than stored.
pub const CORRUPTION_ID_FACTOR: u64 = 10;

/// Fixed-capacity record storage with O(1) id lookup.
#[derive(Debug)]
pub struct NodeArena {
    slots: Vec<Option<Node>>,
    max_nodes: u64,
    live: usize,
}

impl NodeArena {
    /// Creates an empty arena holding at most `max_nodes` records.
    #[must_use]
    pub fn new(max_nodes: u64) -> Self {
        Self {
            slots: Vec::new(),
            max_nodes,
            live: 0,
        }
    }

    /// Physical capacity.
    #[must_use]
    pub fn max_nodes(&self) -> u64 {
        self.max_nodes
    }

    /// Number of ids handed out so far (`total_nodes`), empty slots included.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.slots.len() as u64
    }

    /// Returns `true` if no id has been handed out.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots holding a record.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// The id the next add will receive.
    #[must_use]
    pub fn next_id(&self) -> NodeId {
        NodeId::from_slot(self.slots.len())
    }

    /// Ids still available before the arena is full.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.max_nodes.saturating_sub(self.len())
    }

    /// Returns `true` if a record can pass the corruption guard.
    #[must_use]
    pub fn is_plausible(&self, node: &Node) -> bool {
        self.implausibility(node).is_none()
    }

    /// Why a record fails the corruption guard, if it does.
    ///
    /// Every id is bounded by `max_nodes` times [`CORRUPTION_ID_FACTOR`], and
    /// a chunk always follows its head.
    fn implausibility(&self, node: &Node) -> Option<String> {
        let bound = self.max_nodes.saturating_mul(CORRUPTION_ID_FACTOR);
        if node.id.as_u64() > bound {
            return Some(format!(
                "node id {} exceeds {CORRUPTION_ID_FACTOR}x capacity",
                node.id
            ));
        }
        match node.link {
            NodeLink::Chunk { parent_id, .. } if parent_id >= node.id => Some(format!(
                "chunk {} does not follow its parent {parent_id}",
                node.id
            )),
            _ => None,
        }
    }

    /// Builds the next inline node without storing it.
    ///
    /// # Errors
    ///
    /// Returns `NameTooLong`, `PayloadTooLarge` or `CapacityExceeded`.
    pub fn prepare(&self, name: &str, payload: &[u8], kind: NodeKind) -> LatticeResult<Node> {
        Node::check_fits(name, payload)?;
        self.ensure_room(1)?;
        Ok(Node::new(self.next_id(), kind, name, payload.to_vec()))
    }

    /// Fails unless `count` more ids fit.
    ///
    /// # Errors
    ///
    /// Returns `CapacityExceeded`.
    pub fn ensure_room(&self, count: u64) -> LatticeResult<()> {
        if self.remaining() < count {
            return Err(LatticeError::CapacityExceeded {
                max_nodes: self.max_nodes,
            });
        }
        Ok(())
    }

    /// Stores an inline node at the next slot and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `NameTooLong`, `PayloadTooLarge` or `CapacityExceeded`.
    pub fn add(&mut self, name: &str, payload: &[u8], kind: NodeKind) -> LatticeResult<NodeId> {
        let node = self.prepare(name, payload, kind)?;
        let id = node.id;
        self.insert(node)?;
        Ok(id)
    }

    /// Places a node at the slot its id names.
    ///
    /// Used for chunk writes, snapshot load and WAL replay. Skipped ids
    /// become empty slots. Returns `false` if the slot is already occupied.
    ///
    /// # Errors
    ///
    /// Returns `CorruptionDetected` for id 0 or a record failing the
    /// corruption guard.
    pub fn insert(&mut self, node: Node) -> LatticeResult<bool> {
        let slot = node
            .id
            .slot()
            .ok_or_else(|| LatticeError::corruption("node id 0 is reserved"))?;
        if let Some(reason) = self.implausibility(&node) {
            return Err(LatticeError::corruption(reason));
        }

        if slot >= self.slots.len() {
            self.slots.resize(slot + 1, None);
        }
        if self.slots[slot].is_some() {
            return Ok(false);
        }
        self.slots[slot] = Some(node);
        self.live += 1;
        Ok(true)
    }

    /// Marks every id up to `last` as handed out, leaving gaps empty.
    pub fn reserve_through(&mut self, last: NodeId) {
        if let Some(slot) = last.slot() {
            if slot >= self.slots.len() {
                self.slots.resize(slot + 1, None);
            }
        }
    }

    /// Returns `true` if a record occupies the id's slot.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        id.slot()
            .and_then(|slot| self.slots.get(slot))
            .is_some_and(Option::is_some)
    }

    /// Looks up a node by id.
    ///
    /// Returns `None` for id 0, ids past the end, empty slots, and records
    /// failing the corruption guard.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        let node = self.slots.get(id.slot()?)?.as_ref()?;
        if node.id != id || !self.is_plausible(node) {
            tracing::warn!(%id, stored = %node.id, "omitting implausible record");
            return None;
        }
        Some(node)
    }

    /// Iterates over stored nodes in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> + '_ {
        self.slots
            .iter()
            .flatten()
            .filter(|node| self.is_plausible(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena(max: u64) -> NodeArena {
        NodeArena::new(max)
    }

    #[test]
    fn ids_start_at_one_and_are_dense() {
        let mut a = arena(8);
        assert_eq!(a.add("a", b"1", NodeKind::Primitive).unwrap(), NodeId::new(1));
        assert_eq!(a.add("b", b"2", NodeKind::Pattern).unwrap(), NodeId::new(2));
        assert_eq!(a.len(), 2);
        assert_eq!(a.next_id(), NodeId::new(3));
        assert_eq!(a.get(NodeId::new(2)).unwrap().payload, b"2");
    }

    #[test]
    fn get_returns_none_for_absent_ids() {
        let mut a = arena(8);
        a.add("a", b"", NodeKind::Primitive).unwrap();
        assert!(a.get(NodeId::ABSENT).is_none());
        assert!(a.get(NodeId::new(2)).is_none());
        assert!(a.get(NodeId::new(u64::MAX)).is_none());
    }

    #[test]
    fn capacity_is_enforced() {
        let mut a = arena(2);
        a.add("a", b"", NodeKind::Primitive).unwrap();
        a.add("b", b"", NodeKind::Primitive).unwrap();
        assert!(matches!(
            a.add("c", b"", NodeKind::Primitive),
            Err(LatticeError::CapacityExceeded { max_nodes: 2 })
        ));
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn insert_leaves_gaps_and_never_overwrites() {
        let mut a = arena(8);
        let node = Node::new(NodeId::new(3), NodeKind::Primitive, "c", vec![]);
        assert!(a.insert(node.clone()).unwrap());
        assert!(!a.insert(node).unwrap());

        assert_eq!(a.len(), 3);
        assert_eq!(a.live_count(), 1);
        assert!(!a.contains(NodeId::new(1)));
        assert!(a.get(NodeId::new(1)).is_none());
        assert_eq!(a.next_id(), NodeId::new(4));
    }

    #[test]
    fn corruption_guard_rejects_wild_ids() {
        let mut a = arena(4);
        let wild = Node::new(NodeId::new(41), NodeKind::Primitive, "x", vec![]);
        assert!(matches!(
            a.insert(wild),
            Err(LatticeError::CorruptionDetected { .. })
        ));

        let edge = Node::new(NodeId::new(40), NodeKind::Primitive, "y", vec![]);
        assert!(a.insert(edge).unwrap());
    }

    fn chunk(id: u64, parent: u64) -> Node {
        Node {
            id: NodeId::new(id),
            kind: NodeKind::Primitive,
            name: String::new(),
            payload: vec![],
            link: NodeLink::Chunk {
                parent_id: NodeId::new(parent),
                sequence_index: 0,
            },
        }
    }

    #[test]
    fn corruption_guard_bounds_chunks() {
        let mut a = arena(100);
        assert!(matches!(
            a.insert(chunk(1 << 20, 1)),
            Err(LatticeError::CorruptionDetected { .. })
        ));
        assert_eq!(a.len(), 0);
        assert_eq!(a.remaining(), 100);

        assert!(a.insert(chunk(2, 1)).unwrap());
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn chunk_before_its_parent_is_corrupt() {
        let mut a = arena(8);
        for (id, parent) in [(3, 3), (3, 5)] {
            assert!(matches!(
                a.insert(chunk(id, parent)),
                Err(LatticeError::CorruptionDetected { .. })
            ));
        }
        assert!(a.is_empty());
        assert!(!a.is_plausible(&chunk(3, 4)));
    }

    #[test]
    fn reserve_through_consumes_ids() {
        let mut a = arena(10);
        a.reserve_through(NodeId::new(5));
        assert_eq!(a.next_id(), NodeId::new(6));
        assert_eq!(a.live_count(), 0);
        assert_eq!(a.remaining(), 5);
    }

    #[test]
    fn iter_is_in_id_order() {
        let mut a = arena(10);
        for name in ["z", "a", "m"] {
            a.add(name, b"", NodeKind::Primitive).unwrap();
        }
        let names: Vec<_> = a.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }
}
