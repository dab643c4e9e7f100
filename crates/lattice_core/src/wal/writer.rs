//! WAL writer.

use crate::error::LatticeResult;
use crate::node::Node;
use crate::types::SequenceNumber;
use crate::wal::iterator::WalEntryIterator;
use crate::wal::record::{WalEntry, WalOperation};
use lattice_storage::StorageBackend;
use parking_lot::{Mutex, MutexGuard};

struct WalState {
    backend: Box<dyn StorageBackend>,
    /// Frames accepted but not yet handed to the backend.
    pending: Vec<u8>,
    next_sequence: SequenceNumber,
    since_checkpoint: u64,
}

impl WalState {
    fn write_out(&mut self, durable: bool) -> LatticeResult<()> {
        if !self.pending.is_empty() {
            self.backend.append(&self.pending)?;
            self.pending.clear();
            self.backend.flush()?;
        }
        if durable {
            self.backend.sync()?;
        }
        Ok(())
    }
}

/// Manages WAL appends, flushes and truncation.
///
/// Appends are buffered in memory until `buffer_limit` bytes accumulate,
/// [`WalManager::flush`] is called, or `sync_on_write` forces every entry
/// straight to durable storage.
pub struct WalManager {
    state: Mutex<WalState>,
    sync_on_write: bool,
    buffer_limit: usize,
}

impl WalManager {
    /// Creates a new WAL manager. Sequence numbers start at 1.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_write: bool, buffer_limit: usize) -> Self {
        Self {
            state: Mutex::new(WalState {
                backend,
                pending: Vec::new(),
                next_sequence: SequenceNumber::new(1),
                since_checkpoint: 0,
            }),
            sync_on_write,
            buffer_limit,
        }
    }

    /// Appends an entry for `node` and returns its sequence number.
    ///
    /// On error nothing is logged for this node and the sequence number is
    /// not consumed.
    ///
    /// # Errors
    ///
    /// Returns an error if writing out the buffer fails.
    pub fn append(&self, operation: WalOperation, node: &Node) -> LatticeResult<SequenceNumber> {
        let mut state = self.state.lock();
        let sequence = state.next_sequence;
        let mark = state.pending.len();

        let frame = WalEntry::frame_for(sequence, operation, node);
        state.pending.extend_from_slice(&frame);

        let written = if self.sync_on_write {
            state.write_out(true)
        } else if state.pending.len() >= self.buffer_limit {
            state.write_out(false)
        } else {
            Ok(())
        };

        if let Err(e) = written {
            state.pending.truncate(mark);
            return Err(e);
        }

        state.next_sequence = sequence.next();
        state.since_checkpoint += 1;
        Ok(sequence)
    }

    /// Forces all buffered entries to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or sync fails.
    pub fn flush(&self) -> LatticeResult<()> {
        self.state.lock().write_out(true)
    }

    /// Returns the WAL size including buffered bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn size(&self) -> LatticeResult<u64> {
        let state = self.state.lock();
        Ok(state.backend.size()? + state.pending.len() as u64)
    }

    /// Bytes accepted but not yet written to the backend.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Entries appended since the last [`WalManager::clear`].
    #[must_use]
    pub fn entries_since_checkpoint(&self) -> u64 {
        self.state.lock().since_checkpoint
    }

    /// The sequence number the next append will receive.
    #[must_use]
    pub fn next_sequence(&self) -> SequenceNumber {
        self.state.lock().next_sequence
    }

    pub(crate) fn set_next_sequence(&self, sequence: SequenceNumber) {
        self.state.lock().next_sequence = sequence;
    }

    /// Returns a streaming iterator over the frames already written to the
    /// backend. Buffered entries are not visible until flushed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub fn iter(&self) -> LatticeResult<WalEntryIterator<'_>> {
        let backend = MutexGuard::map(self.state.lock(), |state| &mut state.backend);
        WalEntryIterator::new(backend)
    }

    /// Truncates the written WAL to `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be truncated.
    pub fn truncate(&self, offset: u64) -> LatticeResult<()> {
        self.state.lock().backend.truncate(offset)?;
        Ok(())
    }

    /// Discards every entry, written or buffered.
    ///
    /// Used after a checkpoint has persisted everything in a snapshot.
    /// Sequence numbers keep increasing.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be truncated.
    pub fn clear(&self) -> LatticeResult<()> {
        let mut state = self.state.lock();
        state.pending.clear();
        state.backend.truncate(0)?;
        state.since_checkpoint = 0;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn written_bytes(&self) -> Vec<u8> {
        self.state.lock().backend.read_all().unwrap()
    }
}

impl std::fmt::Debug for WalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalManager")
            .field("sync_on_write", &self.sync_on_write)
            .field("buffer_limit", &self.buffer_limit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeId, NodeKind};
    use crate::wal::WalItem;
    use lattice_storage::InMemoryBackend;

    fn node(id: u64) -> Node {
        Node::new(NodeId::new(id), NodeKind::Primitive, format!("k{id}"), b"v".to_vec())
    }

    fn entries(wal: &WalManager) -> Vec<WalEntry> {
        wal.iter()
            .unwrap()
            .filter_map(|item| match item.unwrap() {
                WalItem::Entry { entry, .. } => Some(entry),
                WalItem::Discarded { .. } => None,
            })
            .collect()
    }

    #[test]
    fn sequence_numbers_increase() {
        let wal = WalManager::new(Box::new(InMemoryBackend::new()), false, 0);
        assert_eq!(wal.append(WalOperation::Add, &node(1)).unwrap().as_u64(), 1);
        assert_eq!(wal.append(WalOperation::Update, &node(2)).unwrap().as_u64(), 2);
        assert_eq!(wal.next_sequence().as_u64(), 3);
        assert_eq!(wal.entries_since_checkpoint(), 2);
    }

    #[test]
    fn buffered_entries_need_flush() {
        let wal = WalManager::new(Box::new(InMemoryBackend::new()), false, 1 << 20);
        wal.append(WalOperation::Add, &node(1)).unwrap();

        assert!(wal.written_bytes().is_empty());
        assert!(wal.pending_bytes() > 0);
        assert!(entries(&wal).is_empty());

        wal.flush().unwrap();
        assert_eq!(wal.pending_bytes(), 0);
        assert_eq!(entries(&wal).len(), 1);
    }

    #[test]
    fn zero_limit_writes_through() {
        let wal = WalManager::new(Box::new(InMemoryBackend::new()), false, 0);
        wal.append(WalOperation::Add, &node(1)).unwrap();
        assert_eq!(wal.pending_bytes(), 0);
        assert_eq!(entries(&wal)[0].node, node(1));
    }

    #[test]
    fn sync_on_write_ignores_buffer_limit() {
        let wal = WalManager::new(Box::new(InMemoryBackend::new()), true, 1 << 20);
        wal.append(WalOperation::Add, &node(1)).unwrap();
        assert_eq!(wal.pending_bytes(), 0);
    }

    #[test]
    fn size_counts_buffered_bytes() {
        let wal = WalManager::new(Box::new(InMemoryBackend::new()), false, 1 << 20);
        wal.append(WalOperation::Add, &node(1)).unwrap();
        let size = wal.size().unwrap();
        wal.flush().unwrap();
        assert_eq!(wal.size().unwrap(), size);
    }

    #[test]
    fn clear_discards_everything() {
        let wal = WalManager::new(Box::new(InMemoryBackend::new()), false, 64);
        for id in 1..=5 {
            wal.append(WalOperation::Add, &node(id)).unwrap();
        }
        wal.clear().unwrap();

        assert_eq!(wal.size().unwrap(), 0);
        assert_eq!(wal.entries_since_checkpoint(), 0);
        assert_eq!(wal.next_sequence().as_u64(), 6);
    }
}
