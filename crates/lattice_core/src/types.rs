//! Core type definitions for the lattice.

use std::fmt;

/// Unique identifier for a node.
///
/// Ids are assigned densely from 1 and never reused. Id 0 means "absent".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

impl NodeId {
    /// The reserved "absent" id.
    pub const ABSENT: Self = Self(0);

    /// Creates a new node ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns `true` for the reserved id 0.
    #[must_use]
    pub const fn is_absent(self) -> bool {
        self.0 == 0
    }

    /// Arena slot for this id (`id - 1`), or `None` for id 0.
    #[must_use]
    pub fn slot(self) -> Option<usize> {
        self.0.checked_sub(1).and_then(|s| usize::try_from(s).ok())
    }

    /// Id stored in the given arena slot.
    #[must_use]
    pub const fn from_slot(slot: usize) -> Self {
        Self(slot as u64 + 1)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sequence number ordering WAL entries.
///
/// Strictly increasing within one WAL; replay applies entries in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Caller-supplied category tag. The engine never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A primitive fact.
    Primitive,
    /// A recurring pattern.
    Pattern,
    /// Something learned from experience.
    Learning,
    /// A pattern to avoid.
    AntiPattern,
    /// Any other tag value.
    Custom(u32),
}

impl NodeKind {
    /// Decodes a tag. Values 0 to 3 map to the named kinds.
    #[must_use]
    pub const fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::Primitive,
            1 => Self::Pattern,
            2 => Self::Learning,
            3 => Self::AntiPattern,
            other => Self::Custom(other),
        }
    }

    /// Encodes the tag.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        match self {
            Self::Primitive => 0,
            Self::Pattern => 1,
            Self::Learning => 2,
            Self::AntiPattern => 3,
            Self::Custom(value) => value,
        }
    }

    /// Parses a kind name (`primitive`, `pattern`, `learning`,
    /// `anti-pattern`) or a numeric tag.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_lowercase().as_str() {
            "primitive" => Some(Self::Primitive),
            "pattern" => Some(Self::Pattern),
            "learning" => Some(Self::Learning),
            "anti-pattern" | "antipattern" | "anti_pattern" => Some(Self::AntiPattern),
            other => other.parse::<u32>().ok().map(Self::from_u32),
        }
    }
}

impl Default for NodeKind {
    fn default() -> Self {
        Self::Primitive
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive => f.write_str("primitive"),
            Self::Pattern => f.write_str("pattern"),
            Self::Learning => f.write_str("learning"),
            Self::AntiPattern => f.write_str("anti-pattern"),
            Self::Custom(value) => write!(f, "{value}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_slots() {
        assert_eq!(NodeId::ABSENT.slot(), None);
        assert_eq!(NodeId::new(1).slot(), Some(0));
        assert_eq!(NodeId::from_slot(41), NodeId::new(42));
        assert!(NodeId::new(0).is_absent());
    }

    #[test]
    fn sequence_number_next() {
        let s1 = SequenceNumber::new(5);
        assert_eq!(s1.next().as_u64(), 6);
        assert!(s1 < s1.next());
    }

    #[test]
    fn kind_tags() {
        assert_eq!(NodeKind::from_u32(3), NodeKind::AntiPattern);
        assert_eq!(NodeKind::from_u32(17), NodeKind::Custom(17));
        assert_eq!(NodeKind::Learning.as_u32(), 2);
        assert_eq!(NodeKind::parse("Anti-Pattern"), Some(NodeKind::AntiPattern));
        assert_eq!(NodeKind::parse("9"), Some(NodeKind::Custom(9)));
        assert_eq!(NodeKind::parse("fact"), None);
        assert_eq!(NodeKind::Pattern.to_string(), "pattern");
    }
}
