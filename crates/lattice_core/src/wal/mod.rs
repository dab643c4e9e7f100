//! Write-ahead log for durability and crash recovery.
//!
//! Every mutation is appended here before it is applied to the arena. On
//! open, entries written after the last snapshot are replayed.
//!
//! ## Frame Format
//!
//! ```text
//! | magic "LWAL" (4) | version (2) | op (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! The payload is the sequence number (u64) followed by the compact node
//! encoding. The CRC covers header and payload.
//!
//! ## Recovery Policy
//!
//! Recovery favours availability of everything that validates:
//!
//! - **Truncated frame** at the end: a crash mid-write. Scanning stops and
//!   the partial bytes are cut off.
//! - **CRC mismatch / undecodable payload** in a complete frame: that entry
//!   is skipped, scanning continues.
//! - **Sequence number not greater than the previous one**: skipped.
//! - **Invalid magic or version**: framing is lost; scanning stops and the
//!   remainder is cut off.
//!
//! Every skipped entry is logged with its offset.
//!
//! ## Invariants
//!
//! - The WAL is append-only between checkpoints
//! - Sequence numbers are strictly increasing in file order
//! - Replay is idempotent: an entry whose node id is already present changes
//!   nothing

mod iterator;
mod record;
mod recovery;
mod writer;

pub use iterator::{WalEntryIterator, WalItem, WalTail};
pub use record::{compute_crc32, WalEntry, WalOperation, WAL_MAGIC, WAL_VERSION};
pub use recovery::{RecoveryReport, ReplayOutcome};
pub use writer::WalManager;
