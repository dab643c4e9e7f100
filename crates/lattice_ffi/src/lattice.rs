//! Lattice FFI functions.

use crate::buffer::LatticeBuffer;
use crate::error::{clear_last_error, fail, set_last_error, LatticeStatus};
use crate::types::{LatticeHandle, LatticeNode, LatticeNodeList, LatticeStats};
use lattice_core::{Config, Lattice, LatticeResult, NodeId, NodeKind};
use std::ffi::{c_char, CStr};
use std::path::Path;

unsafe fn lattice_ref<'a>(handle: *mut LatticeHandle) -> &'a Lattice {
    &*(handle as *const Lattice)
}

unsafe fn str_arg<'a>(ptr: *const c_char, what: &str) -> Result<&'a str, LatticeStatus> {
    CStr::from_ptr(ptr).to_str().map_err(|_| {
        set_last_error(format!("invalid UTF-8 in {what}"));
        LatticeStatus::InvalidArgument
    })
}

unsafe fn bytes_arg<'a>(data: *const u8, len: usize) -> Result<&'a [u8], LatticeStatus> {
    if len == 0 {
        return Ok(&[]);
    }
    if data.is_null() {
        set_last_error("null data pointer with non-zero length");
        return Err(LatticeStatus::InvalidArgument);
    }
    Ok(std::slice::from_raw_parts(data, len))
}

fn null_pointer() -> LatticeStatus {
    set_last_error("null pointer argument");
    LatticeStatus::NullPointer
}

fn config_from(
    max_nodes: u64,
    evaluation_mode: bool,
    license_key: Option<&str>,
) -> Config {
    let mut config = Config::default().evaluation_mode(evaluation_mode);
    if max_nodes > 0 {
        config = config.max_nodes(max_nodes);
    }
    if let Some(key) = license_key {
        config = config.license_key(key);
    }
    config
}

unsafe fn finish_open(
    opened: LatticeResult<Lattice>,
    out_handle: *mut *mut LatticeHandle,
) -> LatticeStatus {
    match opened {
        Ok(lattice) => {
            out_handle.write(Box::into_raw(Box::new(lattice)).cast::<LatticeHandle>());
            LatticeStatus::Ok
        }
        Err(e) => fail(&e),
    }
}

/// Opens or creates the lattice at `path`.
///
/// # Arguments
///
/// * `path` - Snapshot path; the WAL lives at `<path>.wal`
/// * `max_nodes` - Physical capacity, 0 for the default
/// * `evaluation_mode` - Requested evaluation mode
/// * `license_key` - Base64 license key, or null
/// * `out_handle` - Output pointer for the lattice handle
///
/// # Safety
///
/// - `path` must be a valid null-terminated string
/// - `license_key` must be null or a valid null-terminated string
/// - `out_handle` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn lattice_open(
    path: *const c_char,
    max_nodes: u64,
    evaluation_mode: bool,
    license_key: *const c_char,
    out_handle: *mut *mut LatticeHandle,
) -> LatticeStatus {
    clear_last_error();

    if path.is_null() || out_handle.is_null() {
        return null_pointer();
    }
    let path = match str_arg(path, "path") {
        Ok(p) => p,
        Err(status) => return status,
    };
    let key = if license_key.is_null() {
        None
    } else {
        match str_arg(license_key, "license key") {
            Ok(k) => Some(k),
            Err(status) => return status,
        }
    };

    let config = config_from(max_nodes, evaluation_mode, key);
    finish_open(Lattice::open(Path::new(path), config), out_handle)
}

/// Opens an in-memory lattice.
///
/// # Safety
///
/// - `license_key` must be null or a valid null-terminated string
/// - `out_handle` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn lattice_open_memory(
    max_nodes: u64,
    evaluation_mode: bool,
    license_key: *const c_char,
    out_handle: *mut *mut LatticeHandle,
) -> LatticeStatus {
    clear_last_error();

    if out_handle.is_null() {
        return null_pointer();
    }
    let key = if license_key.is_null() {
        None
    } else {
        match str_arg(license_key, "license key") {
            Ok(k) => Some(k),
            Err(status) => return status,
        }
    };

    let config = config_from(max_nodes, evaluation_mode, key);
    finish_open(Lattice::open_in_memory(config), out_handle)
}

/// Closes a lattice and releases the handle.
///
/// The handle is released even if the final WAL flush fails.
///
/// # Safety
///
/// The handle must come from `lattice_open` or `lattice_open_memory` and must
/// not be used after this call.
#[no_mangle]
pub unsafe extern "C" fn lattice_close(handle: *mut LatticeHandle) -> LatticeStatus {
    clear_last_error();

    if handle.is_null() {
        return null_pointer();
    }

    let lattice = Box::from_raw(handle.cast::<Lattice>());
    match lattice.close() {
        Ok(()) => LatticeStatus::Ok,
        Err(e) => fail(&e),
    }
}

/// Adds an inline node.
///
/// # Safety
///
/// - `handle` must be a valid lattice handle
/// - `name` must be a valid null-terminated string
/// - `data` must be valid for `data_len` bytes
/// - `out_id` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn lattice_add_node(
    handle: *mut LatticeHandle,
    name: *const c_char,
    data: *const u8,
    data_len: usize,
    kind: u32,
    out_id: *mut u64,
) -> LatticeStatus {
    write_with(handle, name, data, data_len, kind, out_id, Lattice::add_node)
}

/// Adds a payload of any size, chunked across records. Outputs the head id.
///
/// # Safety
///
/// As `lattice_add_node`.
#[no_mangle]
pub unsafe extern "C" fn lattice_add_node_chunked(
    handle: *mut LatticeHandle,
    name: *const c_char,
    data: *const u8,
    data_len: usize,
    kind: u32,
    out_id: *mut u64,
) -> LatticeStatus {
    write_with(
        handle,
        name,
        data,
        data_len,
        kind,
        out_id,
        Lattice::add_node_chunked,
    )
}

unsafe fn write_with(
    handle: *mut LatticeHandle,
    name: *const c_char,
    data: *const u8,
    data_len: usize,
    kind: u32,
    out_id: *mut u64,
    write: fn(&Lattice, &str, &[u8], NodeKind) -> LatticeResult<NodeId>,
) -> LatticeStatus {
    clear_last_error();

    if handle.is_null() || name.is_null() || out_id.is_null() {
        return null_pointer();
    }
    let lattice = lattice_ref(handle);
    let name = match str_arg(name, "name") {
        Ok(n) => n,
        Err(status) => return status,
    };
    let payload = match bytes_arg(data, data_len) {
        Ok(p) => p,
        Err(status) => return status,
    };

    match write(lattice, name, payload, NodeKind::from_u32(kind)) {
        Ok(id) => {
            out_id.write(id.as_u64());
            LatticeStatus::Ok
        }
        Err(e) => fail(&e),
    }
}

/// Gets a node by id.
///
/// # Returns
///
/// `Ok` with `out_node` filled, or `NotFound`.
///
/// # Safety
///
/// - `handle` must be a valid lattice handle
/// - `out_node` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn lattice_get_node(
    handle: *mut LatticeHandle,
    id: u64,
    out_node: *mut LatticeNode,
) -> LatticeStatus {
    clear_last_error();

    if handle.is_null() || out_node.is_null() {
        return null_pointer();
    }
    out_node.write(LatticeNode::empty());

    match lattice_ref(handle).get_node(NodeId::new(id)) {
        Ok(Some(node)) => {
            out_node.write(LatticeNode::from_node(node));
            LatticeStatus::Ok
        }
        Ok(None) => LatticeStatus::NotFound,
        Err(e) => fail(&e),
    }
}

/// Newest node per name starting with `prefix`, at most `limit` of them.
///
/// # Safety
///
/// - `handle` must be a valid lattice handle
/// - `prefix` must be a valid null-terminated string
/// - `out_list` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn lattice_find_by_prefix(
    handle: *mut LatticeHandle,
    prefix: *const c_char,
    limit: usize,
    out_list: *mut LatticeNodeList,
) -> LatticeStatus {
    clear_last_error();

    if handle.is_null() || prefix.is_null() || out_list.is_null() {
        return null_pointer();
    }
    out_list.write(LatticeNodeList::empty());

    let prefix = match str_arg(prefix, "prefix") {
        Ok(p) => p,
        Err(status) => return status,
    };

    match lattice_ref(handle).find_by_prefix(prefix, limit) {
        Ok(nodes) => {
            out_list.write(LatticeNodeList::from_nodes(nodes));
            LatticeStatus::Ok
        }
        Err(e) => fail(&e),
    }
}

/// Reassembles the payload stored under `id`.
///
/// # Returns
///
/// `Ok` with `out_buffer` filled, `NotFound`, or `ChunkIntegrity`.
///
/// # Safety
///
/// - `handle` must be a valid lattice handle
/// - `out_buffer` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn lattice_get_node_chunked(
    handle: *mut LatticeHandle,
    id: u64,
    out_buffer: *mut LatticeBuffer,
) -> LatticeStatus {
    clear_last_error();

    if handle.is_null() || out_buffer.is_null() {
        return null_pointer();
    }
    out_buffer.write(LatticeBuffer::empty());

    match lattice_ref(handle).get_node_chunked(NodeId::new(id)) {
        Ok(Some(bytes)) => {
            out_buffer.write(LatticeBuffer::from_vec(bytes));
            LatticeStatus::Ok
        }
        Ok(None) => LatticeStatus::NotFound,
        Err(e) => fail(&e),
    }
}

unsafe fn run(handle: *mut LatticeHandle, op: fn(&Lattice) -> LatticeResult<()>) -> LatticeStatus {
    clear_last_error();

    if handle.is_null() {
        return null_pointer();
    }
    match op(lattice_ref(handle)) {
        Ok(()) => LatticeStatus::Ok,
        Err(e) => fail(&e),
    }
}

/// Forces buffered WAL entries to durable storage.
///
/// # Safety
///
/// `handle` must be a valid lattice handle.
#[no_mangle]
pub unsafe extern "C" fn lattice_flush(handle: *mut LatticeHandle) -> LatticeStatus {
    run(handle, Lattice::flush)
}

/// Writes a snapshot and truncates the WAL.
///
/// # Safety
///
/// `handle` must be a valid lattice handle.
#[no_mangle]
pub unsafe extern "C" fn lattice_checkpoint(handle: *mut LatticeHandle) -> LatticeStatus {
    run(handle, Lattice::checkpoint)
}

/// Writes a snapshot, keeping the WAL.
///
/// # Safety
///
/// `handle` must be a valid lattice handle.
#[no_mangle]
pub unsafe extern "C" fn lattice_save(handle: *mut LatticeHandle) -> LatticeStatus {
    run(handle, Lattice::save)
}

/// Leaves evaluation mode.
///
/// Returns 0 on success and -1 otherwise; the reason is available from
/// `lattice_last_error`.
///
/// # Safety
///
/// `handle` must be null or a valid lattice handle.
#[no_mangle]
pub unsafe extern "C" fn lattice_disable_evaluation_mode(handle: *mut LatticeHandle) -> i32 {
    if run(handle, Lattice::disable_evaluation_mode).is_ok() {
        0
    } else {
        -1
    }
}

/// Reads the statistics counters.
///
/// # Safety
///
/// - `handle` must be a valid lattice handle
/// - `out_stats` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn lattice_stats(
    handle: *mut LatticeHandle,
    out_stats: *mut LatticeStats,
) -> LatticeStatus {
    clear_last_error();

    if handle.is_null() || out_stats.is_null() {
        return null_pointer();
    }
    let lattice = lattice_ref(handle);
    out_stats.write(LatticeStats::from_snapshot(lattice.stats(), lattice.node_count()));
    LatticeStatus::Ok
}

/// Ids handed out so far, chunk records included. Returns 0 for a null
/// handle.
///
/// # Safety
///
/// `handle` must be null or a valid lattice handle.
#[no_mangle]
pub unsafe extern "C" fn lattice_node_count(handle: *mut LatticeHandle) -> u64 {
    if handle.is_null() {
        return 0;
    }
    lattice_ref(handle).node_count()
}

/// Tier code in force (0 = free ... 5 = unlimited). Returns 0 for a null
/// handle.
///
/// # Safety
///
/// `handle` must be null or a valid lattice handle.
#[no_mangle]
pub unsafe extern "C" fn lattice_tier(handle: *mut LatticeHandle) -> u8 {
    if handle.is_null() {
        return 0;
    }
    lattice_ref(handle).tier().as_byte()
}

/// Frees a node returned by `lattice_get_node`.
///
/// # Safety
///
/// The node must come from this library and not be freed before.
#[no_mangle]
pub unsafe extern "C" fn lattice_free_node(node: LatticeNode) {
    node.release();
}

/// Frees a list returned by `lattice_find_by_prefix`.
///
/// # Safety
///
/// The list must come from this library and not be freed before.
#[no_mangle]
pub unsafe extern "C" fn lattice_free_node_list(list: LatticeNodeList) {
    list.release();
}

/// Returns the library version as a null-terminated string.
///
/// The returned pointer is static and must not be freed.
#[no_mangle]
pub extern "C" fn lattice_version() -> *const c_char {
    static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
    VERSION.as_ptr().cast::<c_char>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::lattice_free_buffer;
    use crate::error::lattice_last_error;
    use std::ffi::CString;

    unsafe fn open_memory(max_nodes: u64) -> *mut LatticeHandle {
        let mut handle: *mut LatticeHandle = std::ptr::null_mut();
        let status = lattice_open_memory(max_nodes, true, std::ptr::null(), &mut handle);
        assert_eq!(status, LatticeStatus::Ok);
        assert!(!handle.is_null());
        handle
    }

    unsafe fn add(handle: *mut LatticeHandle, name: &str, data: &[u8]) -> LatticeStatus {
        let name = CString::new(name).unwrap();
        let mut id = 0u64;
        lattice_add_node(handle, name.as_ptr(), data.as_ptr(), data.len(), 0, &mut id)
    }

    #[test]
    fn open_memory_and_close() {
        unsafe {
            let handle = open_memory(0);
            assert_eq!(lattice_close(handle), LatticeStatus::Ok);
        }
    }

    #[test]
    fn add_get_and_prefix() {
        unsafe {
            let handle = open_memory(0);
            assert_eq!(add(handle, "P:a:1", b"a1"), LatticeStatus::Ok);
            assert_eq!(add(handle, "P:a:2", b"a2"), LatticeStatus::Ok);
            assert_eq!(add(handle, "P:b:1", b"b1"), LatticeStatus::Ok);

            let mut node = LatticeNode::empty();
            assert_eq!(lattice_get_node(handle, 1, &mut node), LatticeStatus::Ok);
            assert_eq!(node.payload.as_slice(), b"a1");
            lattice_free_node(node);

            let prefix = CString::new("P:a:").unwrap();
            let mut list = LatticeNodeList::empty();
            assert_eq!(
                lattice_find_by_prefix(handle, prefix.as_ptr(), 10, &mut list),
                LatticeStatus::Ok
            );
            assert_eq!(list.len, 2);
            let nodes = std::slice::from_raw_parts(list.nodes, list.len);
            assert_eq!(nodes[1].payload.as_slice(), b"a2");
            lattice_free_node_list(list);

            let mut missing = LatticeNode::empty();
            assert_eq!(lattice_get_node(handle, 99, &mut missing), LatticeStatus::NotFound);

            lattice_close(handle);
        }
    }

    #[test]
    fn chunked_roundtrip() {
        unsafe {
            let handle = open_memory(0);
            let data = vec![0xA5u8; 2000];
            let name = CString::new("doc").unwrap();
            let mut id = 0u64;
            assert_eq!(
                lattice_add_node_chunked(handle, name.as_ptr(), data.as_ptr(), data.len(), 2, &mut id),
                LatticeStatus::Ok
            );
            assert_eq!(lattice_node_count(handle), 5);

            let mut buffer = LatticeBuffer::empty();
            assert_eq!(lattice_get_node_chunked(handle, id, &mut buffer), LatticeStatus::Ok);
            assert_eq!(buffer.as_slice(), data.as_slice());
            lattice_free_buffer(buffer);

            lattice_close(handle);
        }
    }

    #[test]
    fn capacity_is_a_distinct_status() {
        unsafe {
            let handle = open_memory(1);
            assert_eq!(add(handle, "a", b""), LatticeStatus::Ok);
            assert_eq!(add(handle, "b", b""), LatticeStatus::CapacityExceeded);
            assert!(!lattice_last_error().is_null());

            let mut stats = LatticeStats::default();
            assert_eq!(lattice_stats(handle, &mut stats), LatticeStatus::Ok);
            assert_eq!(stats.capacity_rejections, 1);
            assert_eq!(stats.node_count, 1);

            lattice_close(handle);
        }
    }

    #[test]
    fn disable_evaluation_mode_without_key_fails() {
        unsafe {
            let handle = open_memory(0);
            assert_eq!(lattice_disable_evaluation_mode(handle), -1);
            assert_eq!(lattice_tier(handle), 0);
            assert_eq!(lattice_disable_evaluation_mode(std::ptr::null_mut()), -1);
            lattice_close(handle);
        }
    }

    #[test]
    fn keys_from_a_foreign_issuer_stay_free_tier() {
        let key = lattice_testkit::fixtures::TestIssuer::new().key(lattice_core::Tier::Unlimited);
        let key = CString::new(key).unwrap();

        unsafe {
            let mut handle: *mut LatticeHandle = std::ptr::null_mut();
            assert_eq!(
                lattice_open_memory(0, true, key.as_ptr(), &mut handle),
                LatticeStatus::Ok
            );
            assert_eq!(lattice_tier(handle), 0);
            assert_eq!(lattice_disable_evaluation_mode(handle), -1);
            lattice_close(handle);
        }
    }

    #[test]
    fn persistence_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = CString::new(dir.path().join("ffi.lattice").to_str().unwrap()).unwrap();

        unsafe {
            let mut handle: *mut LatticeHandle = std::ptr::null_mut();
            assert_eq!(
                lattice_open(path.as_ptr(), 0, true, std::ptr::null(), &mut handle),
                LatticeStatus::Ok
            );
            assert_eq!(add(handle, "k", b"v"), LatticeStatus::Ok);
            assert_eq!(lattice_checkpoint(handle), LatticeStatus::Ok);
            lattice_close(handle);

            let mut handle: *mut LatticeHandle = std::ptr::null_mut();
            assert_eq!(
                lattice_open(path.as_ptr(), 0, true, std::ptr::null(), &mut handle),
                LatticeStatus::Ok
            );
            assert_eq!(lattice_node_count(handle), 1);
            lattice_close(handle);
        }
    }

    #[test]
    fn version() {
        let s = unsafe { CStr::from_ptr(lattice_version()) };
        assert_eq!(s.to_str().unwrap(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn null_pointer_handling() {
        unsafe {
            assert_eq!(
                lattice_open_memory(0, true, std::ptr::null(), std::ptr::null_mut()),
                LatticeStatus::NullPointer
            );
            assert_eq!(lattice_close(std::ptr::null_mut()), LatticeStatus::NullPointer);
            assert_eq!(lattice_flush(std::ptr::null_mut()), LatticeStatus::NullPointer);
        }
    }
}
