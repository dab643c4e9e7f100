//! Nodes and their fixed-stride on-disk record.
//!
//! Every node occupies exactly [`RECORD_SIZE`] bytes in a snapshot:
//!
//! ```text
//! offset  size  field
//!      0     8  id (u64, 0 = never written)
//!      8     4  kind tag (u32)
//!     12     1  flags (0x01 chunk, 0x02 chunk head)
//!     13     1  reserved
//!     14     2  name length (u16)
//!     16     2  payload length (u16)
//!     18     2  reserved
//!     20     8  parent id (chunks)
//!     28     4  sequence index (chunks) / chunk count (heads)
//!     32     4  total payload length (heads)
//!     36     4  CRC32 over the whole record with this field zeroed
//!     40   256  name bytes
//!    296   511  payload bytes
//!    807   217  zero padding
//! ```
//!
//! All integers are little-endian.

use crate::error::{LatticeError, LatticeResult};
use crate::types::{NodeId, NodeKind};
use crate::wal::compute_crc32;

/// Size of one record in bytes.
pub const RECORD_SIZE: usize = 1024;

/// Maximum name length in bytes.
pub const NAME_CAPACITY: usize = 256;

/// Maximum inline payload length in bytes.
pub const PAYLOAD_CAPACITY: usize = 511;

const FLAG_CHUNK: u8 = 0x01;
const FLAG_CHUNK_HEAD: u8 = 0x02;

const CRC_OFFSET: usize = 36;
const NAME_OFFSET: usize = 40;
const PAYLOAD_OFFSET: usize = NAME_OFFSET + NAME_CAPACITY;

/// How a node relates to other records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeLink {
    /// Self-contained record with an inline payload.
    Inline,
    /// Logical head of a chunked payload. Its chunks follow it by id.
    ChunkHead {
        /// Length of the reassembled payload.
        total_len: u32,
        /// Number of chunk records.
        chunk_count: u32,
    },
    /// Continuation record carrying one slice of a chunked payload.
    Chunk {
        /// Head this chunk belongs to.
        parent_id: NodeId,
        /// Position of this slice, starting at 0.
        sequence_index: u32,
    },
}

/// One stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Unique identifier.
    pub id: NodeId,
    /// Caller-supplied tag.
    pub kind: NodeKind,
    /// Lookup and prefix key. Empty for chunk records.
    pub name: String,
    /// Inline payload, or one slice for chunk records.
    pub payload: Vec<u8>,
    /// Chunk linkage.
    pub link: NodeLink,
}

impl Node {
    /// Creates an inline node.
    #[must_use]
    pub fn new(id: NodeId, kind: NodeKind, name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            payload,
            link: NodeLink::Inline,
        }
    }

    /// Returns `true` for continuation records.
    #[must_use]
    pub fn is_chunk(&self) -> bool {
        matches!(self.link, NodeLink::Chunk { .. })
    }

    /// Returns `true` for chunked-payload heads.
    #[must_use]
    pub fn is_chunk_head(&self) -> bool {
        matches!(self.link, NodeLink::ChunkHead { .. })
    }

    /// Checks name and payload against record capacity.
    ///
    /// # Errors
    ///
    /// Returns `NameTooLong` or `PayloadTooLarge`.
    pub fn check_fits(name: &str, payload: &[u8]) -> LatticeResult<()> {
        if name.len() > NAME_CAPACITY {
            return Err(LatticeError::NameTooLong {
                len: name.len(),
                max: NAME_CAPACITY,
            });
        }
        if payload.len() > PAYLOAD_CAPACITY {
            return Err(LatticeError::PayloadTooLarge {
                len: payload.len(),
                max: PAYLOAD_CAPACITY,
            });
        }
        Ok(())
    }

    fn link_fields(&self) -> (u8, u64, u32, u32) {
        match self.link {
            NodeLink::Inline => (0, 0, 0, 0),
            NodeLink::ChunkHead {
                total_len,
                chunk_count,
            } => (FLAG_CHUNK_HEAD, 0, chunk_count, total_len),
            NodeLink::Chunk {
                parent_id,
                sequence_index,
            } => (FLAG_CHUNK, parent_id.as_u64(), sequence_index, 0),
        }
    }

    fn link_from_fields(flags: u8, parent: u64, index: u32, total: u32) -> LatticeResult<NodeLink> {
        match flags {
            0 => Ok(NodeLink::Inline),
            FLAG_CHUNK_HEAD => Ok(NodeLink::ChunkHead {
                total_len: total,
                chunk_count: index,
            }),
            FLAG_CHUNK if parent != 0 => Ok(NodeLink::Chunk {
                parent_id: NodeId::new(parent),
                sequence_index: index,
            }),
            FLAG_CHUNK => Err(LatticeError::corruption("chunk record without parent")),
            other => Err(LatticeError::corruption(format!(
                "unknown record flags {other:#04x}"
            ))),
        }
    }

    /// Encodes the node into one fixed-size record.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or payload exceed record capacity.
    pub fn encode_record(&self) -> LatticeResult<Vec<u8>> {
        Self::check_fits(&self.name, &self.payload)?;

        let (flags, parent, index, total) = self.link_fields();
        let mut buf = vec![0u8; RECORD_SIZE];
        buf[0..8].copy_from_slice(&self.id.as_u64().to_le_bytes());
        buf[8..12].copy_from_slice(&self.kind.as_u32().to_le_bytes());
        buf[12] = flags;
        buf[14..16].copy_from_slice(&(self.name.len() as u16).to_le_bytes());
        buf[16..18].copy_from_slice(&(self.payload.len() as u16).to_le_bytes());
        buf[20..28].copy_from_slice(&parent.to_le_bytes());
        buf[28..32].copy_from_slice(&index.to_le_bytes());
        buf[32..36].copy_from_slice(&total.to_le_bytes());
        buf[NAME_OFFSET..NAME_OFFSET + self.name.len()].copy_from_slice(self.name.as_bytes());
        buf[PAYLOAD_OFFSET..PAYLOAD_OFFSET + self.payload.len()].copy_from_slice(&self.payload);

        let crc = compute_crc32(&buf);
        buf[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decodes one record.
    ///
    /// Returns `Ok(None)` for an all-zero slot that was never written.
    ///
    /// # Errors
    ///
    /// Returns `CorruptionDetected` or `ChecksumMismatch` if the record does
    /// not validate.
    pub fn decode_record(record: &[u8]) -> LatticeResult<Option<Self>> {
        if record.len() != RECORD_SIZE {
            return Err(LatticeError::corruption(format!(
                "record is {} bytes, expected {RECORD_SIZE}",
                record.len()
            )));
        }
        if record.iter().all(|&b| b == 0) {
            return Ok(None);
        }

        let mut scratch = record.to_vec();
        scratch[CRC_OFFSET..CRC_OFFSET + 4].fill(0);
        let actual = compute_crc32(&scratch);
        let expected = read_u32(record, CRC_OFFSET);
        if expected != actual {
            return Err(LatticeError::ChecksumMismatch { expected, actual });
        }

        let id = read_u64(record, 0);
        if id == 0 {
            return Err(LatticeError::corruption("written record with id 0"));
        }
        let kind = NodeKind::from_u32(read_u32(record, 8));
        let name_len = usize::from(read_u16(record, 14));
        let payload_len = usize::from(read_u16(record, 16));
        if name_len > NAME_CAPACITY || payload_len > PAYLOAD_CAPACITY {
            return Err(LatticeError::corruption(format!(
                "record {id} lengths out of range (name {name_len}, payload {payload_len})"
            )));
        }

        let link = Self::link_from_fields(
            record[12],
            read_u64(record, 20),
            read_u32(record, 28),
            read_u32(record, 32),
        )?;
        let name = std::str::from_utf8(&record[NAME_OFFSET..NAME_OFFSET + name_len])
            .map_err(|_| LatticeError::corruption(format!("record {id} name is not UTF-8")))?
            .to_string();
        let payload = record[PAYLOAD_OFFSET..PAYLOAD_OFFSET + payload_len].to_vec();

        Ok(Some(Self {
            id: NodeId::new(id),
            kind,
            name,
            payload,
            link,
        }))
    }

    /// Appends the compact WAL encoding of this node to `buf`.
    pub(crate) fn encode_compact(&self, buf: &mut Vec<u8>) {
        let (flags, parent, index, total) = self.link_fields();
        buf.extend_from_slice(&self.id.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.kind.as_u32().to_le_bytes());
        buf.push(flags);
        buf.extend_from_slice(&parent.to_le_bytes());
        buf.extend_from_slice(&index.to_le_bytes());
        buf.extend_from_slice(&total.to_le_bytes());
        buf.extend_from_slice(&(self.name.len() as u16).to_le_bytes());
        buf.extend_from_slice(self.name.as_bytes());
        buf.extend_from_slice(&(self.payload.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.payload);
    }

    /// Decodes the compact WAL encoding. The whole of `bytes` must be consumed.
    pub(crate) fn decode_compact(bytes: &[u8]) -> LatticeResult<Self> {
        let mut cursor = Cursor::new(bytes);
        let id = cursor.u64()?;
        let kind = NodeKind::from_u32(cursor.u32()?);
        let flags = cursor.u8()?;
        let parent = cursor.u64()?;
        let index = cursor.u32()?;
        let total = cursor.u32()?;
        let name_len = usize::from(cursor.u16()?);
        let name = std::str::from_utf8(cursor.take(name_len)?)
            .map_err(|_| LatticeError::corruption("node name is not UTF-8"))?
            .to_string();
        let payload_len = usize::from(cursor.u16()?);
        let payload = cursor.take(payload_len)?.to_vec();
        cursor.finish()?;

        if id == 0 {
            return Err(LatticeError::corruption("node with id 0"));
        }
        Self::check_fits(&name, &payload)?;

        Ok(Self {
            id: NodeId::new(id),
            kind,
            name,
            payload,
            link: Self::link_from_fields(flags, parent, index, total)?,
        })
    }
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

/// Bounds-checked little-endian reader.
pub(crate) struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn take(&mut self, len: usize) -> LatticeResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| LatticeError::corruption("unexpected end of data"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> LatticeResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> LatticeResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> LatticeResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&mut self) -> LatticeResult<u64> {
        Ok(read_u64(self.take(8)?, 0))
    }

    /// Fails if any bytes remain.
    pub(crate) fn finish(&self) -> LatticeResult<()> {
        if self.pos != self.data.len() {
            return Err(LatticeError::corruption(format!(
                "{} trailing bytes",
                self.data.len() - self.pos
            )));
        }
        Ok(())
    }
}
