//! Owned byte buffers handed across the boundary.

/// A byte buffer for FFI.
///
/// Memory is owned by Rust. Call `lattice_free_buffer` to release.
#[repr(C)]
#[derive(Debug)]
pub struct LatticeBuffer {
    /// Pointer to data.
    pub data: *mut u8,
    /// Length in bytes.
    pub len: usize,
    /// Capacity (for internal use).
    pub capacity: usize,
}

impl LatticeBuffer {
    /// Creates a new buffer from a Vec.
    pub fn from_vec(vec: Vec<u8>) -> Self {
        if vec.is_empty() {
            return Self::empty();
        }
        let mut boxed = vec.into_boxed_slice();
        let data = boxed.as_mut_ptr();
        let len = boxed.len();
        std::mem::forget(boxed);

        Self {
            data,
            len,
            capacity: len,
        }
    }

    /// Creates an empty buffer.
    pub fn empty() -> Self {
        Self {
            data: std::ptr::null_mut(),
            len: 0,
            capacity: 0,
        }
    }

    /// Returns true if the buffer holds no allocation.
    pub fn is_null(&self) -> bool {
        self.data.is_null()
    }

    /// Views the buffer contents.
    ///
    /// # Safety
    ///
    /// The buffer must have been created by [`LatticeBuffer::from_vec`] and
    /// not freed.
    pub unsafe fn as_slice(&self) -> &[u8] {
        if self.data.is_null() {
            return &[];
        }
        std::slice::from_raw_parts(self.data, self.len)
    }

    /// Releases the allocation.
    ///
    /// # Safety
    ///
    /// The buffer must have been created by [`LatticeBuffer::from_vec`] and
    /// not freed before.
    pub(crate) unsafe fn release(self) {
        if !self.data.is_null() {
            drop(Vec::from_raw_parts(self.data, self.len, self.capacity));
        }
    }
}

/// Frees a buffer allocated by the lattice library.
///
/// # Safety
///
/// The buffer must have been allocated by lattice FFI functions and not
/// freed before.
#[no_mangle]
pub unsafe extern "C" fn lattice_free_buffer(buffer: LatticeBuffer) {
    buffer.release();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_from_vec() {
        let buffer = LatticeBuffer::from_vec(vec![1u8, 2, 3, 4, 5]);
        assert!(!buffer.is_null());
        assert_eq!(buffer.len, 5);
        assert_eq!(unsafe { buffer.as_slice() }, &[1, 2, 3, 4, 5]);
        unsafe { lattice_free_buffer(buffer) };
    }

    #[test]
    fn empty_vec_is_null_buffer() {
        let buffer = LatticeBuffer::from_vec(Vec::new());
        assert!(buffer.is_null());
        assert_eq!(unsafe { buffer.as_slice() }, &[] as &[u8]);
        unsafe { lattice_free_buffer(buffer) };
    }
}
