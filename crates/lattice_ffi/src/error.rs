//! Status codes and the per-thread last error.

use lattice_core::LatticeError;
use std::cell::RefCell;
use std::ffi::CString;

/// Status returned by every fallible FFI function.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatticeStatus {
    /// Operation succeeded.
    Ok = 0,
    /// Generic error.
    Error = 1,
    /// Invalid argument.
    InvalidArgument = 2,
    /// Node not found.
    NotFound = 3,
    /// Physical capacity reached.
    CapacityExceeded = 4,
    /// License tier ceiling reached.
    TierLimitExceeded = 5,
    /// Lattice is closed.
    Closed = 6,
    /// Lattice is locked by another handle.
    Locked = 7,
    /// Corruption detected.
    Corruption = 8,
    /// I/O error.
    IoError = 9,
    /// Snapshot is not a lattice snapshot.
    InvalidFormat = 10,
    /// Null pointer.
    NullPointer = 11,
    /// Chunked payload could not be reassembled.
    ChunkIntegrity = 12,
    /// Name or payload exceeds the record capacity.
    TooLarge = 13,
    /// Evaluation mode cannot be lifted under this license.
    EvaluationModeLocked = 14,
}

impl LatticeStatus {
    /// Returns true if the status indicates success.
    pub fn is_ok(self) -> bool {
        self == LatticeStatus::Ok
    }

    /// Returns true if the status indicates an error.
    pub fn is_err(self) -> bool {
        self != LatticeStatus::Ok
    }
}

impl From<&LatticeError> for LatticeStatus {
    fn from(err: &LatticeError) -> Self {
        match err {
            LatticeError::CapacityExceeded { .. } => Self::CapacityExceeded,
            LatticeError::TierLimitExceeded { .. } => Self::TierLimitExceeded,
            LatticeError::EvaluationModeLocked { .. } => Self::EvaluationModeLocked,
            LatticeError::CorruptionDetected { .. }
            | LatticeError::ChecksumMismatch { .. }
            | LatticeError::WalReplay { .. } => Self::Corruption,
            LatticeError::ChunkIntegrity { .. } => Self::ChunkIntegrity,
            LatticeError::InvalidFormat { .. } => Self::InvalidFormat,
            LatticeError::NameTooLong { .. } | LatticeError::PayloadTooLarge { .. } => {
                Self::TooLarge
            }
            LatticeError::InvalidArgument { .. } | LatticeError::LicenseInvalid { .. } => {
                Self::InvalidArgument
            }
            LatticeError::NotFound { .. } => Self::NotFound,
            LatticeError::LatticeLocked => Self::Locked,
            LatticeError::LatticeClosed => Self::Closed,
            LatticeError::Io(_) | LatticeError::Storage(_) => Self::IoError,
        }
    }
}

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Sets the last error message.
pub fn set_last_error(message: impl Into<String>) {
    let msg = message.into();
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clears the last error.
pub fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Records `err` as the last error and returns its status.
pub(crate) fn fail(err: &LatticeError) -> LatticeStatus {
    set_last_error(err.to_string());
    err.into()
}

/// Gets the last error message as a C string.
///
/// Returns null if no error is set.
///
/// # Safety
///
/// The returned pointer is valid until the next FFI call on this thread.
#[no_mangle]
pub extern "C" fn lattice_last_error() -> *const std::ffi::c_char {
    LAST_ERROR.with(|e| match e.borrow().as_ref() {
        Some(cstr) => cstr.as_ptr(),
        None => std::ptr::null(),
    })
}

/// Clears the last error message.
#[no_mangle]
pub extern "C" fn lattice_clear_error() {
    clear_last_error();
}
