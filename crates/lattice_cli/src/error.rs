//! CLI error type.

use lattice_core::LatticeError;
use std::io;
use thiserror::Error;

/// Errors surfaced by CLI commands and daemon requests.
#[derive(Debug, Error)]
pub enum CliError {
    /// Engine error.
    #[error(transparent)]
    Lattice(#[from] LatticeError),

    /// Request could not be understood.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Nothing stored under the requested key or id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Integrity check failed.
    #[error("verification failed: {0}")]
    Verification(String),

    /// I/O error on stdin/stdout.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// JSON encoding error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Stable machine-readable code for protocol responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Lattice(e) => e.code(),
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Verification(_) => "verification_failed",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }
}

impl From<lattice_storage::StorageError> for CliError {
    fn from(err: lattice_storage::StorageError) -> Self {
        Self::Lattice(err.into())
    }
}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;
