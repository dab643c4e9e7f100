//! Ordered prefix index over node names.
//!
//! Names live in a `BTreeMap`, so a prefix query is a range scan starting at
//! the first key `>= prefix` that stops at the first key not starting with
//! it, or once `limit` names are collected. Cost is proportional to the
//! number of names visited, which is at most `limit + 1`.
//!
//! Each name keeps every id written under it, ascending. Queries return only
//! the newest; [`PrefixIndex::versions`] exposes the rest.

use crate::types::NodeId;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Ids returned by a prefix scan together with its cost.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixScan {
    /// Newest id per matching name, in ascending name order.
    pub ids: Vec<NodeId>,
    /// Index keys examined.
    pub keys_visited: usize,
}

/// Name to ids map supporting bounded prefix scans.
#[derive(Debug, Default)]
pub struct PrefixIndex {
    entries: BTreeMap<String, Vec<NodeId>>,
    total_ids: usize,
}

impl PrefixIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `id` under `name`. Returns `false` if it was already there.
    pub fn insert(&mut self, name: &str, id: NodeId) -> bool {
        let versions = self.entries.entry(name.to_string()).or_default();
        match versions.binary_search(&id) {
            Ok(_) => false,
            Err(pos) => {
                versions.insert(pos, id);
                self.total_ids += 1;
                true
            }
        }
    }

    /// Returns `true` if any id is recorded under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Newest id under `name`.
    #[must_use]
    pub fn latest(&self, name: &str) -> Option<NodeId> {
        self.entries.get(name).and_then(|v| v.last().copied())
    }

    /// Every id under `name`, oldest first.
    #[must_use]
    pub fn versions(&self, name: &str) -> &[NodeId] {
        self.entries.get(name).map_or(&[], Vec::as_slice)
    }

    /// Number of distinct names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no name is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of ids across all names.
    #[must_use]
    pub fn total_ids(&self) -> usize {
        self.total_ids
    }

    /// Scans names starting with `prefix`, newest id per name, at most
    /// `limit` results. An empty prefix matches every name.
    #[must_use]
    pub fn scan(&self, prefix: &str, limit: usize) -> PrefixScan {
        let (ids, keys_visited) = self.scan_with(prefix, limit, Some);
        PrefixScan { ids, keys_visited }
    }

    /// Like [`PrefixIndex::scan`], resolving each newest id through
    /// `resolve`. Ids it rejects are skipped and do not count toward
    /// `limit`. Returns the resolved items and the keys examined.
    pub fn scan_with<T, F>(&self, prefix: &str, limit: usize, mut resolve: F) -> (Vec<T>, usize)
    where
        F: FnMut(NodeId) -> Option<T>,
    {
        let mut items = Vec::new();
        let mut keys_visited = 0;
        if limit == 0 {
            return (items, keys_visited);
        }

        let range = self
            .entries
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded));
        for (name, versions) in range {
            keys_visited += 1;
            if !name.starts_with(prefix) {
                break;
            }
            if let Some(item) = versions.last().and_then(|&id| resolve(id)) {
                items.push(item);
            }
            if items.len() >= limit {
                break;
            }
        }
        (items, keys_visited)
    }

    /// Shorthand for [`PrefixIndex::scan`] returning only the ids.
    #[must_use]
    pub fn find(&self, prefix: &str, limit: usize) -> Vec<NodeId> {
        self.scan(prefix, limit).ids
    }
}
