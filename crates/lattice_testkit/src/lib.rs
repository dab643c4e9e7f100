//! # Lattice Testkit
//!
//! Test utilities for lattice.
//!
//! This crate provides:
//! - Test fixtures and lattice helpers
//! - License keys signed by a test issuer
//! - Crash images and WAL damage helpers
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lattice_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_lattice() {
//!     with_temp_lattice(|lattice| {
//!         lattice.add_node("P:a:1", b"a1", NodeKind::Primitive).unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use lattice_core::{Config, Lattice, LatticeError, NodeId, NodeKind, Tier};
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
