//! Error types for the lattice engine.

use crate::license::Tier;
use std::io;
use thiserror::Error;

/// Result type for lattice operations.
pub type LatticeResult<T> = Result<T, LatticeError>;

/// Errors that can occur in lattice operations.
#[derive(Debug, Error)]
pub enum LatticeError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] lattice_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The physical arena is full.
    #[error("capacity exceeded: lattice holds {max_nodes} nodes")]
    CapacityExceeded {
        /// Configured physical capacity.
        max_nodes: u64,
    },

    /// The license tier ceiling has been reached.
    #[error("tier limit exceeded: {tier} allows {ceiling} nodes")]
    TierLimitExceeded {
        /// The active tier.
        tier: Tier,
        /// The ceiling of that tier.
        ceiling: u64,
    },

    /// A record or header failed validation.
    #[error("corruption detected: {message}")]
    CorruptionDetected {
        /// Description of the corruption.
        message: String,
    },

    /// A chunked payload could not be reassembled.
    #[error("chunk integrity error for node {head_id}: {message}")]
    ChunkIntegrity {
        /// Id of the chunk head.
        head_id: u64,
        /// What was wrong with the chain.
        message: String,
    },

    /// A WAL entry is malformed or out of order.
    #[error("WAL replay error at offset {offset}: {message}")]
    WalReplay {
        /// Byte offset of the entry in the WAL.
        offset: u64,
        /// Description of the problem.
        message: String,
    },

    /// License key failed parsing, signature or expiry checks.
    #[error("license invalid: {reason}")]
    LicenseInvalid {
        /// Why the key was rejected.
        reason: String,
    },

    /// Snapshot file is not a lattice snapshot.
    #[error("invalid lattice format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// Node name does not fit in a record.
    #[error("name too long: {len} bytes (max {max})")]
    NameTooLong {
        /// Length supplied.
        len: usize,
        /// Name capacity of a record.
        max: usize,
    },

    /// Inline payload does not fit in a record.
    #[error("payload too large: {len} bytes (max {max}); use chunked writes")]
    PayloadTooLarge {
        /// Length supplied.
        len: usize,
        /// Inline payload capacity of a record.
        max: usize,
    },

    /// Caller supplied an unusable argument.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// Evaluation mode cannot be lifted for this tier or build.
    #[error("evaluation mode locked for tier {tier}")]
    EvaluationModeLocked {
        /// The active tier.
        tier: Tier,
    },

    /// No lattice exists at the path and creation was not requested.
    #[error("lattice not found: {path}")]
    NotFound {
        /// Path that was opened.
        path: String,
    },

    /// Another handle holds the lattice lock.
    #[error("lattice locked: another process has exclusive access")]
    LatticeLocked,

    /// The handle has been closed.
    #[error("lattice is closed")]
    LatticeClosed,
}

impl LatticeError {
    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::CorruptionDetected {
            message: message.into(),
        }
    }

    /// Creates a chunk integrity error.
    pub fn chunk_integrity(head_id: u64, message: impl Into<String>) -> Self {
        Self::ChunkIntegrity {
            head_id,
            message: message.into(),
        }
    }

    /// Creates a WAL replay error.
    pub fn wal_replay(offset: u64, message: impl Into<String>) -> Self {
        Self::WalReplay {
            offset,
            message: message.into(),
        }
    }

    /// Creates a license error.
    pub fn license_invalid(reason: impl Into<String>) -> Self {
        Self::LicenseInvalid {
            reason: reason.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Returns `true` for capacity and tier outcomes.
    ///
    /// These must reach the caller as distinct results and are never
    /// absorbed by recovery paths.
    #[must_use]
    pub fn is_enforcement(&self) -> bool {
        matches!(
            self,
            Self::CapacityExceeded { .. }
                | Self::TierLimitExceeded { .. }
                | Self::EvaluationModeLocked { .. }
        )
    }

    /// Short machine-readable name of the variant.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Storage(_) => "storage",
            Self::Io(_) => "io",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::TierLimitExceeded { .. } => "tier_limit_exceeded",
            Self::CorruptionDetected { .. } => "corruption_detected",
            Self::ChunkIntegrity { .. } => "chunk_integrity",
            Self::WalReplay { .. } => "wal_replay",
            Self::LicenseInvalid { .. } => "license_invalid",
            Self::InvalidFormat { .. } => "invalid_format",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::NameTooLong { .. } => "name_too_long",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::EvaluationModeLocked { .. } => "evaluation_mode_locked",
            Self::NotFound { .. } => "not_found",
            Self::LatticeLocked => "locked",
            Self::LatticeClosed => "closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforcement_errors_are_flagged() {
        assert!(LatticeError::CapacityExceeded { max_nodes: 4 }.is_enforcement());
        assert!(LatticeError::TierLimitExceeded {
            tier: Tier::Free,
            ceiling: 10_000
        }
        .is_enforcement());
        assert!(!LatticeError::corruption("bad crc").is_enforcement());
        assert!(!LatticeError::LatticeClosed.is_enforcement());
    }

    #[test]
    fn messages_carry_context() {
        let err = LatticeError::TierLimitExceeded {
            tier: Tier::Tier100K,
            ceiling: 100_000,
        };
        assert_eq!(
            err.to_string(),
            "tier limit exceeded: tier-100k allows 100000 nodes"
        );

        let err = LatticeError::chunk_integrity(7, "missing chunk 2");
        assert_eq!(
            err.to_string(),
            "chunk integrity error for node 7: missing chunk 2"
        );
    }

    #[test]
    fn storage_errors_convert() {
        let storage = lattice_storage::StorageError::TruncateBeyondEnd {
            requested: 10,
            size: 2,
        };
        let err: LatticeError = storage.into();
        assert_eq!(err.code(), "storage");
    }
}
