//! # Lattice Core
//!
//! Embeddable key/prefix store for agent memory.
//!
//! A lattice is a bounded collection of named nodes. Names are queried by
//! prefix in time proportional to the number of matches, independent of how
//! many nodes the lattice holds. This crate provides:
//! - Node arena with fixed-size, CRC-protected records
//! - Ordered prefix index with newest-version-per-name queries
//! - Write-ahead log with crash recovery
//! - Atomic snapshots and checkpoints
//! - Chunking for payloads larger than one record
//! - Signed-license tier ceilings
//!
//! ## Example
//!
//! ```rust
//! use lattice_core::{Config, Lattice, NodeKind};
//!
//! let lattice = Lattice::open_in_memory(Config::default()).unwrap();
//! lattice.add_node("P:a:1", b"a1", NodeKind::Pattern).unwrap();
//! lattice.add_node("P:b:1", b"b1", NodeKind::Pattern).unwrap();
//!
//! let hits = lattice.find_by_prefix("P:a:", 10).unwrap();
//! assert_eq!(hits.len(), 1);
//! assert_eq!(hits[0].payload, b"a1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod arena;
pub mod chunk;
mod config;
mod error;
mod files;
mod index;
mod lattice;
mod license;
mod node;
pub mod snapshot;
mod stats;
mod types;
mod usage;
pub mod wal;

pub use arena::NodeArena;
pub use config::{Config, DEFAULT_MAX_NODES, DEFAULT_WAL_BUFFER_LIMIT};
pub use error::{LatticeError, LatticeResult};
pub use files::{wal_path_for, LatticeFiles};
pub use index::{PrefixIndex, PrefixScan};
pub use lattice::{Lattice, OpenReport, PrefixQuery};
pub use license::{
    unix_now, LicenseKey, LicenseVerifier, Tier, TierGuard, TierResolution, FIXED_CAPACITY,
    PRODUCT_PUBLIC_KEY,
};
pub use node::{Node, NodeLink, NAME_CAPACITY, PAYLOAD_CAPACITY, RECORD_SIZE};
pub use stats::{LatticeStats, StatsSnapshot};
pub use types::{NodeId, NodeKind, SequenceNumber};
pub use usage::{hardware_id, TracingReporter, UsageReport, UsageReporter};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
