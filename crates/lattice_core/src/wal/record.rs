//! WAL entry types and framing.

use crate::error::{LatticeError, LatticeResult};
use crate::node::Node;
use crate::types::SequenceNumber;

/// Magic bytes opening every WAL frame.
pub const WAL_MAGIC: [u8; 4] = *b"LWAL";

/// Current WAL format version.
pub const WAL_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
pub(crate) const HEADER_SIZE: usize = 11;

pub(crate) const CRC_SIZE: usize = 4;

/// Largest payload a well-formed frame can carry: sequence number plus a
/// node with a full name and inline payload, with headroom.
pub(crate) const MAX_FRAME_PAYLOAD: usize = 4096;

/// Mutation recorded by a WAL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalOperation {
    /// First record under a name, or a chunk record.
    Add = 1,
    /// A newer version of an existing name.
    Update = 2,
}

impl WalOperation {
    /// Converts a byte to an operation.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Add),
            2 => Some(Self::Update),
            _ => None,
        }
    }

    /// Converts the operation to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
        }
    }
}

/// One logged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    /// Position in the authoritative replay order.
    pub sequence: SequenceNumber,
    /// What the entry does.
    pub operation: WalOperation,
    /// Full image of the node being written.
    pub node: Node,
}

impl WalEntry {
    /// Serializes the entry payload (without envelope).
    #[must_use]
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.node.name.len() + self.node.payload.len());
        buf.extend_from_slice(&self.sequence.as_u64().to_le_bytes());
        self.node.encode_compact(&mut buf);
        buf
    }

    /// Deserializes an entry from its operation and payload.
    ///
    /// # Errors
    ///
    /// Returns `CorruptionDetected` if the payload is short, has trailing
    /// bytes or holds an invalid node.
    pub fn decode_payload(operation: WalOperation, payload: &[u8]) -> LatticeResult<Self> {
        if payload.len() < 8 {
            return Err(LatticeError::corruption("WAL payload shorter than sequence"));
        }
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&payload[..8]);
        let node = Node::decode_compact(&payload[8..])?;

        Ok(Self {
            sequence: SequenceNumber::new(u64::from_le_bytes(seq)),
            operation,
            node,
        })
    }

    /// Builds the complete frame: header, payload and CRC.
    #[must_use]
    pub fn encode_frame(&self) -> Vec<u8> {
        Self::frame_for(self.sequence, self.operation, &self.node)
    }

    /// Builds the frame for a node without taking ownership of it.
    #[must_use]
    pub fn frame_for(sequence: SequenceNumber, operation: WalOperation, node: &Node) -> Vec<u8> {
        let mut payload = Vec::with_capacity(64 + node.name.len() + node.payload.len());
        payload.extend_from_slice(&sequence.as_u64().to_le_bytes());
        node.encode_compact(&mut payload);

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);

        data.extend_from_slice(&WAL_MAGIC);
        data.extend_from_slice(&WAL_VERSION.to_le_bytes());
        data.push(operation.as_byte());
        // Bounded by record capacity, far below u32::MAX.
        data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        data.extend_from_slice(&payload);

        // CRC32 over everything before it
        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        data
    }
}

/// CRC32 (IEEE) of `data`, shared by WAL frames and snapshot records.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}
