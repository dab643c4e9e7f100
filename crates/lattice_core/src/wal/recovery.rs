//! WAL replay on open.

use crate::error::LatticeResult;
use crate::types::SequenceNumber;
use crate::wal::iterator::{WalItem, WalTail};
use crate::wal::record::WalEntry;
use crate::wal::writer::WalManager;

/// Result of applying one replayed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// The entry changed state.
    Applied,
    /// State already contained the entry (it was covered by the snapshot).
    AlreadyApplied,
}

/// Summary of one recovery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Entries applied to state.
    pub replayed: u64,
    /// Entries already present in the snapshot.
    pub already_applied: u64,
    /// Entries rejected by CRC, decoding, ordering or application.
    pub discarded: u64,
    /// Highest sequence number accepted.
    pub last_sequence: SequenceNumber,
    /// How the WAL ended before repair.
    pub tail: WalTail,
}

impl Default for RecoveryReport {
    fn default() -> Self {
        Self {
            replayed: 0,
            already_applied: 0,
            discarded: 0,
            last_sequence: SequenceNumber::new(0),
            tail: WalTail::Clean,
        }
    }
}

impl WalManager {
    /// Replays every valid entry in sequence order through `apply`.
    ///
    /// Entries that fail validation, arrive out of sequence, or that `apply`
    /// rejects are logged and skipped. A torn or unreadable tail is cut off
    /// so later appends land on a well-formed log. Afterwards the next
    /// sequence number follows the last accepted one.
    ///
    /// # Errors
    ///
    /// Returns an error only for I/O failures on the WAL itself.
    pub fn recover<F>(&self, mut apply: F) -> LatticeResult<RecoveryReport>
    where
        F: FnMut(&WalEntry) -> LatticeResult<ReplayOutcome>,
    {
        let mut report = RecoveryReport::default();

        {
            let mut iter = self.iter()?;
            for item in iter.by_ref() {
                match item? {
                    WalItem::Entry { offset, entry } => {
                        if entry.sequence <= report.last_sequence {
                            tracing::warn!(
                                offset,
                                sequence = entry.sequence.as_u64(),
                                last = report.last_sequence.as_u64(),
                                "discarding out-of-order WAL entry"
                            );
                            report.discarded += 1;
                            continue;
                        }

                        match apply(&entry) {
                            Ok(ReplayOutcome::Applied) => report.replayed += 1,
                            Ok(ReplayOutcome::AlreadyApplied) => report.already_applied += 1,
                            Err(e) => {
                                tracing::warn!(offset, error = %e, "discarding unappliable WAL entry");
                                report.discarded += 1;
                                continue;
                            }
                        }
                        report.last_sequence = entry.sequence;
                    }
                    WalItem::Discarded { offset, error } => {
                        tracing::warn!(offset, %error, "discarding invalid WAL entry");
                        report.discarded += 1;
                    }
                }
            }
            report.tail = iter.tail().cloned().unwrap_or(WalTail::Clean);
        }

        if let Some(cut) = report.tail.cut_offset() {
            tracing::warn!(offset = cut, tail = ?report.tail, "truncating damaged WAL tail");
            self.truncate(cut)?;
        }

        self.set_next_sequence(report.last_sequence.next());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LatticeError;
    use crate::node::Node;
    use crate::types::{NodeId, NodeKind};
    use crate::wal::record::WalOperation;
    use lattice_storage::InMemoryBackend;
    use std::collections::HashSet;

    fn frame(seq: u64, id: u64) -> Vec<u8> {
        let node = Node::new(NodeId::new(id), NodeKind::Primitive, format!("k{id}"), vec![]);
        WalEntry::frame_for(SequenceNumber::new(seq), WalOperation::Add, &node)
    }

    fn wal_with(bytes: Vec<u8>) -> WalManager {
        WalManager::new(Box::new(InMemoryBackend::with_data(bytes)), false, 0)
    }

    #[test]
    fn replays_in_order_and_sets_next_sequence() {
        let mut bytes = frame(1, 1);
        bytes.extend(frame(2, 2));
        bytes.extend(frame(3, 3));
        let wal = wal_with(bytes);

        let mut seen = Vec::new();
        let report = wal
            .recover(|entry| {
                seen.push(entry.node.id.as_u64());
                Ok(ReplayOutcome::Applied)
            })
            .unwrap();

        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(report.replayed, 3);
        assert_eq!(report.tail, WalTail::Clean);
        assert_eq!(wal.next_sequence().as_u64(), 4);
    }

    #[test]
    fn replay_is_idempotent_against_existing_state() {
        let mut bytes = frame(1, 1);
        bytes.extend(frame(2, 2));
        let wal = wal_with(bytes);

        let mut state: HashSet<u64> = [1].into_iter().collect();
        let report = wal
            .recover(|entry| {
                if state.insert(entry.node.id.as_u64()) {
                    Ok(ReplayOutcome::Applied)
                } else {
                    Ok(ReplayOutcome::AlreadyApplied)
                }
            })
            .unwrap();

        assert_eq!(report.replayed, 1);
        assert_eq!(report.already_applied, 1);
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn non_increasing_sequence_is_discarded() {
        let mut bytes = frame(5, 1);
        bytes.extend(frame(5, 2));
        bytes.extend(frame(4, 3));
        bytes.extend(frame(6, 4));
        let wal = wal_with(bytes);

        let mut seen = Vec::new();
        let report = wal
            .recover(|entry| {
                seen.push(entry.node.id.as_u64());
                Ok(ReplayOutcome::Applied)
            })
            .unwrap();

        assert_eq!(seen, vec![1, 4]);
        assert_eq!(report.discarded, 2);
        assert_eq!(report.last_sequence.as_u64(), 6);
    }

    #[test]
    fn apply_errors_are_skipped() {
        let mut bytes = frame(1, 1);
        bytes.extend(frame(2, 2));
        let wal = wal_with(bytes);

        let report = wal
            .recover(|entry| {
                if entry.node.id.as_u64() == 1 {
                    Err(LatticeError::corruption("boom"))
                } else {
                    Ok(ReplayOutcome::Applied)
                }
            })
            .unwrap();

        assert_eq!(report.discarded, 1);
        assert_eq!(report.replayed, 1);
    }

    #[test]
    fn torn_tail_is_cut_so_appends_survive() {
        let good = frame(1, 1);
        let torn = frame(2, 2);
        let mut bytes = good.clone();
        bytes.extend_from_slice(&torn[..torn.len() / 2]);
        let wal = wal_with(bytes);

        let report = wal.recover(|_| Ok(ReplayOutcome::Applied)).unwrap();
        assert!(matches!(report.tail, WalTail::Torn { .. }));
        assert_eq!(wal.written_bytes(), good);

        let node = Node::new(NodeId::new(2), NodeKind::Primitive, "k2", vec![]);
        wal.append(WalOperation::Add, &node).unwrap();

        let report = wal.recover(|_| Ok(ReplayOutcome::Applied)).unwrap();
        assert_eq!(report.replayed, 2);
        assert_eq!(report.tail, WalTail::Clean);
    }
}
