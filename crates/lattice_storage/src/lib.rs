//! # Lattice Storage
//!
//! Byte-store backends underneath the lattice engine.
//!
//! Backends are **opaque**: they append, read, flush and truncate bytes and
//! never interpret node records, WAL entries or snapshot headers. The engine
//! in `lattice_core` owns every file format.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - ephemeral lattices and unit tests
//! - [`FileBackend`] - persistent storage through OS file APIs
//!
//! Whole-file replacement (used for snapshots) goes through
//! [`write_file_atomic`], which never leaves a half-written target behind.
//!
//! ## Example
//!
//! ```rust
//! use lattice_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"P:a:1").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"P:a:1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod atomic;
mod backend;
mod error;
mod file;
mod memory;

pub use atomic::{sync_parent_dir, write_file_atomic};
pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
