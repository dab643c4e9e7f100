//! # Lattice FFI
//!
//! Stable C ABI over `lattice_core`.
//!
//! Conventions:
//! - Every fallible function returns a [`LatticeStatus`]; the message of the
//!   last failure on the calling thread is available from
//!   `lattice_last_error`.
//! - Handles are created by `lattice_open`/`lattice_open_memory` and released
//!   exactly once by `lattice_close`.
//! - Buffers, nodes and node lists returned to the caller are owned by this
//!   library and released with the matching `lattice_free_*` function.
//! - Capacity and tier outcomes have their own status codes.

#![warn(missing_docs)]

mod buffer;
mod error;
mod lattice;
mod types;

pub use buffer::*;
pub use error::*;
pub use lattice::*;
pub use types::*;
