//! Streaming WAL entry iterator.
//!
//! Reads frames one at a time from the backend. A frame that is complete but
//! fails its CRC or decodes to garbage is yielded as [`WalItem::Discarded`]
//! and iteration continues with the next frame. When framing breaks in the
//! middle of the log the iterator resynchronizes on the next frame that
//! validates. Iteration ends only where no valid frame follows; [`WalTail`]
//! records why.

use crate::error::{LatticeError, LatticeResult};
use crate::wal::record::{
    compute_crc32, WalEntry, WalOperation, CRC_SIZE, HEADER_SIZE, MAX_FRAME_PAYLOAD, WAL_MAGIC,
    WAL_VERSION,
};
use lattice_storage::StorageBackend;
use parking_lot::MappedMutexGuard;

/// One position in the WAL.
#[derive(Debug)]
pub enum WalItem {
    /// A valid entry.
    Entry {
        /// Byte offset of the frame.
        offset: u64,
        /// The decoded entry.
        entry: WalEntry,
    },
    /// A damaged frame or byte run that must not be applied.
    Discarded {
        /// Byte offset of the frame.
        offset: u64,
        /// Why it was rejected.
        error: LatticeError,
    },
}

/// How the scan ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalTail {
    /// Every byte belonged to a complete frame.
    Clean,
    /// The last frame was cut short, typically by a crash mid-write.
    Torn {
        /// Offset of the incomplete frame.
        offset: u64,
    },
    /// Framing is unreadable from this offset on and no valid frame follows.
    Unreadable {
        /// Offset where framing broke.
        offset: u64,
        /// What was found there.
        reason: String,
    },
}

impl WalTail {
    /// Offset up to which the WAL is well-formed, if it is not clean.
    #[must_use]
    pub fn cut_offset(&self) -> Option<u64> {
        match self {
            Self::Clean => None,
            Self::Torn { offset } | Self::Unreadable { offset, .. } => Some(*offset),
        }
    }
}

/// Validates a frame header and returns the full frame length it declares.
fn frame_len_from_header(header: &[u8]) -> Result<usize, String> {
    if header[0..4] != WAL_MAGIC {
        return Err("invalid magic".into());
    }

    let version = u16::from_le_bytes([header[4], header[5]]);
    if version == 0 || version > WAL_VERSION {
        return Err(format!("unsupported version {version}"));
    }

    let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
    if payload_len > MAX_FRAME_PAYLOAD {
        return Err(format!("implausible payload length {payload_len}"));
    }

    Ok(HEADER_SIZE + payload_len + CRC_SIZE)
}

/// Stored and computed checksum of a complete frame.
fn frame_checksums(frame: &[u8]) -> (u32, u32) {
    let crc_at = frame.len() - CRC_SIZE;
    let stored = u32::from_le_bytes([
        frame[crc_at],
        frame[crc_at + 1],
        frame[crc_at + 2],
        frame[crc_at + 3],
    ]);
    (stored, compute_crc32(&frame[..crc_at]))
}

/// Length of the frame at the start of `bytes` if it is complete and its
/// checksum holds.
fn valid_frame_len(bytes: &[u8]) -> Option<usize> {
    let frame_len = frame_len_from_header(bytes.get(..HEADER_SIZE)?).ok()?;
    let (stored, computed) = frame_checksums(bytes.get(..frame_len)?);
    (stored == computed).then_some(frame_len)
}

/// Position of the first valid frame in `bytes`.
fn find_valid_frame(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(WAL_MAGIC.len())
        .enumerate()
        .filter(|(_, window)| *window == WAL_MAGIC)
        .map(|(at, _)| at)
        .find(|&at| valid_frame_len(&bytes[at..]).is_some())
}

/// A streaming iterator over WAL frames.
///
/// Holds the WAL lock for its lifetime.
pub struct WalEntryIterator<'a> {
    backend: MappedMutexGuard<'a, Box<dyn StorageBackend>>,
    total_size: u64,
    offset: u64,
    tail: Option<WalTail>,
}

impl<'a> WalEntryIterator<'a> {
    pub(crate) fn new(backend: MappedMutexGuard<'a, Box<dyn StorageBackend>>) -> LatticeResult<Self> {
        let total_size = backend.size()?;
        Ok(Self {
            backend,
            total_size,
            offset: 0,
            tail: None,
        })
    }

    /// How the scan ended, once the iterator is exhausted.
    #[must_use]
    pub fn tail(&self) -> Option<&WalTail> {
        self.tail.as_ref()
    }

    fn stop(&mut self, tail: WalTail) -> Option<LatticeResult<WalItem>> {
        self.tail = Some(tail);
        None
    }

    fn fail(&mut self, offset: u64, error: LatticeError) -> Option<LatticeResult<WalItem>> {
        self.tail = Some(WalTail::Unreadable {
            offset,
            reason: error.to_string(),
        });
        Some(Err(error))
    }

    /// Offset of the next valid frame at or after `from`.
    fn resync(&self, from: u64) -> LatticeResult<Option<u64>> {
        if from >= self.total_size {
            return Ok(None);
        }
        let len = usize::try_from(self.total_size - from)
            .map_err(|_| LatticeError::corruption("WAL too large to scan"))?;
        let rest = self.backend.read_at(from, len)?;
        Ok(find_valid_frame(&rest).map(|at| from + at as u64))
    }

    /// Whether a valid frame starts exactly at `at`.
    fn valid_frame_at(&self, at: u64) -> LatticeResult<bool> {
        let remaining = self.total_size.saturating_sub(at);
        let len = remaining.min((HEADER_SIZE + MAX_FRAME_PAYLOAD + CRC_SIZE) as u64) as usize;
        if len < HEADER_SIZE {
            return Ok(false);
        }
        let bytes = self.backend.read_at(at, len)?;
        Ok(valid_frame_len(&bytes).is_some())
    }

    /// Skips broken framing at `offset`.
    ///
    /// Continues at the next valid frame if there is one, reporting the
    /// skipped bytes as discarded. Otherwise the scan ends with `tail`.
    fn skip_broken_framing(&mut self, offset: u64, tail: WalTail) -> Option<LatticeResult<WalItem>> {
        match self.resync(offset + 1) {
            Ok(Some(next)) => {
                tracing::warn!(offset, next, "resynchronized WAL scan after broken framing");
                self.offset = next;
                let reason = match &tail {
                    WalTail::Unreadable { reason, .. } => reason.clone(),
                    _ => "frame overruns the next valid frame".into(),
                };
                Some(Ok(WalItem::Discarded {
                    offset,
                    error: LatticeError::wal_replay(offset, reason),
                }))
            }
            Ok(None) => self.stop(tail),
            Err(e) => self.fail(offset, e),
        }
    }

    /// Skips a complete frame whose checksum failed.
    ///
    /// The declared length is trusted only when a valid frame, or the end of
    /// the log, follows it.
    fn skip_bad_checksum(
        &mut self,
        offset: u64,
        frame_len: usize,
        error: LatticeError,
    ) -> Option<LatticeResult<WalItem>> {
        let boundary = offset + frame_len as u64;
        let next = if boundary == self.total_size {
            Ok(Some(boundary))
        } else {
            match self.valid_frame_at(boundary) {
                Ok(true) => Ok(Some(boundary)),
                Ok(false) => self.resync(offset + 1),
                Err(e) => Err(e),
            }
        };

        match next {
            Ok(Some(next)) => self.offset = next,
            Ok(None) => {
                self.tail = Some(WalTail::Unreadable {
                    offset,
                    reason: "no valid frame after checksum failure".into(),
                });
            }
            Err(e) => return self.fail(offset, e),
        }
        Some(Ok(WalItem::Discarded { offset, error }))
    }

    fn read_next(&mut self) -> Option<LatticeResult<WalItem>> {
        let offset = self.offset;
        let remaining = self.total_size - offset;

        if remaining == 0 {
            return self.stop(WalTail::Clean);
        }
        if remaining < HEADER_SIZE as u64 {
            return self.stop(WalTail::Torn { offset });
        }

        let header = match self.backend.read_at(offset, HEADER_SIZE) {
            Ok(header) => header,
            Err(e) => return self.fail(offset, e.into()),
        };

        let frame_len = match frame_len_from_header(&header) {
            Ok(frame_len) => frame_len,
            Err(reason) => {
                return self.skip_broken_framing(offset, WalTail::Unreadable { offset, reason })
            }
        };
        if remaining < frame_len as u64 {
            return self.skip_broken_framing(offset, WalTail::Torn { offset });
        }

        let frame = match self.backend.read_at(offset, frame_len) {
            Ok(frame) => frame,
            Err(e) => return self.fail(offset, e.into()),
        };

        let (stored, computed) = frame_checksums(&frame);
        if stored != computed {
            let error = LatticeError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            };
            return self.skip_bad_checksum(offset, frame_len, error);
        }
        self.offset += frame_len as u64;

        let Some(operation) = WalOperation::from_byte(header[6]) else {
            return Some(Ok(WalItem::Discarded {
                offset,
                error: LatticeError::wal_replay(offset, format!("unknown operation {}", header[6])),
            }));
        };

        let crc_at = frame_len - CRC_SIZE;
        let item = match WalEntry::decode_payload(operation, &frame[HEADER_SIZE..crc_at]) {
            Ok(entry) => WalItem::Entry { offset, entry },
            Err(e) => WalItem::Discarded {
                offset,
                error: LatticeError::wal_replay(offset, e.to_string()),
            },
        };
        Some(Ok(item))
    }
}

impl Iterator for WalEntryIterator<'_> {
    type Item = LatticeResult<WalItem>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.tail.is_some() {
            return None;
        }
        self.read_next()
    }
}

impl std::fmt::Debug for WalEntryIterator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalEntryIterator")
            .field("offset", &self.offset)
            .field("total_size", &self.total_size)
            .field("tail", &self.tail)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::types::{NodeId, NodeKind, SequenceNumber};
    use crate::wal::WalManager;
    use lattice_storage::InMemoryBackend;

    fn frame(seq: u64) -> Vec<u8> {
        let node = Node::new(
            NodeId::new(seq),
            NodeKind::Primitive,
            format!("P:item:{seq}"),
            vec![seq as u8; 8],
        );
        WalEntry::frame_for(SequenceNumber::new(seq), WalOperation::Add, &node)
    }

    fn wal_with(bytes: Vec<u8>) -> WalManager {
        WalManager::new(Box::new(InMemoryBackend::with_data(bytes)), false, 0)
    }

    fn collect(wal: &WalManager) -> (Vec<WalItem>, WalTail) {
        let mut iter = wal.iter().unwrap();
        let items: Vec<_> = iter.by_ref().map(Result::unwrap).collect();
        (items, iter.tail().cloned().unwrap())
    }

    #[test]
    fn empty_wal_is_clean() {
        let (items, tail) = collect(&wal_with(Vec::new()));
        assert!(items.is_empty());
        assert_eq!(tail, WalTail::Clean);
    }

    #[test]
    fn reads_consecutive_entries() {
        let mut bytes = frame(1);
        bytes.extend(frame(2));
        let (items, tail) = collect(&wal_with(bytes));

        assert_eq!(items.len(), 2);
        assert_eq!(tail, WalTail::Clean);
        match &items[1] {
            WalItem::Entry { entry, .. } => assert_eq!(entry.node.name, "P:item:2"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn torn_tail_ends_scan() {
        let first = frame(1);
        let mut bytes = first.clone();
        let second = frame(2);
        bytes.extend_from_slice(&second[..second.len() - 3]);

        let (items, tail) = collect(&wal_with(bytes));
        assert_eq!(items.len(), 1);
        assert_eq!(
            tail,
            WalTail::Torn {
                offset: first.len() as u64
            }
        );
    }

    #[test]
    fn partial_header_is_torn() {
        let mut bytes = frame(1);
        let cut = bytes.len() as u64;
        bytes.extend_from_slice(b"LWA");

        let (_, tail) = collect(&wal_with(bytes));
        assert_eq!(tail, WalTail::Torn { offset: cut });
    }

    #[test]
    fn crc_failure_skips_only_that_entry() {
        let mut bad = frame(2);
        let mid = bad.len() / 2;
        bad[mid] ^= 0xFF;

        let mut bytes = frame(1);
        bytes.extend(bad);
        bytes.extend(frame(3));

        let (items, tail) = collect(&wal_with(bytes));
        assert_eq!(tail, WalTail::Clean);
        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], WalItem::Entry { .. }));
        assert!(matches!(
            items[1],
            WalItem::Discarded {
                error: LatticeError::ChecksumMismatch { .. },
                ..
            }
        ));
        assert!(matches!(items[2], WalItem::Entry { .. }));
    }

    #[test]
    fn bad_magic_resyncs_on_next_frame() {
        let mut bytes = frame(1);
        let cut = bytes.len() as u64;
        let mut garbage = frame(2);
        garbage[0..4].copy_from_slice(b"XXXX");
        bytes.extend(garbage);
        bytes.extend(frame(3));

        let (items, tail) = collect(&wal_with(bytes));
        assert_eq!(tail, WalTail::Clean);
        assert_eq!(items.len(), 3);
        assert!(matches!(items[1], WalItem::Discarded { offset, .. } if offset == cut));
        match &items[2] {
            WalItem::Entry { entry, .. } => assert_eq!(entry.node.name, "P:item:3"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn trailing_garbage_stops_scan() {
        let mut bytes = frame(1);
        let cut = bytes.len() as u64;
        bytes.extend_from_slice(&[0xAB; 64]);

        let (items, tail) = collect(&wal_with(bytes));
        assert_eq!(items.len(), 1);
        assert!(matches!(tail, WalTail::Unreadable { offset, .. } if offset == cut));
        assert_eq!(tail.cut_offset(), Some(cut));
    }

    #[test]
    fn corrupt_length_field_skips_only_that_entry() {
        let first = frame(1);
        let mut bytes = first.clone();
        bytes.extend(frame(2));
        bytes.extend(frame(3));
        bytes.extend(frame(4));
        // Low byte of the second frame's length.
        bytes[first.len() + 7] ^= 0x01;

        let (items, tail) = collect(&wal_with(bytes));
        assert_eq!(tail, WalTail::Clean);
        let names: Vec<_> = items
            .iter()
            .filter_map(|item| match item {
                WalItem::Entry { entry, .. } => Some(entry.node.name.clone()),
                WalItem::Discarded { .. } => None,
            })
            .collect();
        assert_eq!(names, vec!["P:item:1", "P:item:3", "P:item:4"]);
        assert_eq!(items.len(), 4);
    }

    #[test]
    fn oversized_length_mid_log_is_not_a_torn_tail() {
        let first = frame(1);
        let mut bytes = first.clone();
        bytes.extend(frame(2));
        bytes.extend(frame(3));
        // Second frame now claims more bytes than the log holds.
        bytes[first.len() + 8] = 0x0F;

        let (items, tail) = collect(&wal_with(bytes));
        assert_eq!(tail, WalTail::Clean);
        assert_eq!(items.len(), 3);
        assert!(matches!(items[2], WalItem::Entry { .. }));
    }

    #[test]
    fn checksum_failure_on_last_frame_keeps_clean_tail() {
        let mut bytes = frame(1);
        let mut last = frame(2);
        let mid = last.len() / 2;
        last[mid] ^= 0xFF;
        bytes.extend(last);

        let (items, tail) = collect(&wal_with(bytes));
        assert_eq!(tail, WalTail::Clean);
        assert!(matches!(items[1], WalItem::Discarded { .. }));
    }
}
