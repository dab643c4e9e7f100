//! Crash recovery testing for lattice.
//!
//! A crash is simulated by copying the lattice files while the handle is
//! still open: the copy holds exactly what a killed process would have left
//! on disk. Reopening the copy runs the normal recovery path.
//!
//! ## Test Strategy
//!
//! 1. **Crash after flush** - flushed WAL entries must be replayed
//! 2. **Crash with buffered entries** - unflushed entries are lost, nothing else
//! 3. **Crash mid-append** - the torn frame is cut, earlier entries survive
//! 4. **Crash after checkpoint** - snapshot plus newer WAL entries are merged
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lattice_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::new();
//! assert!(harness.test_flushed_writes_survive().passed);
//! ```

use crate::fixtures::{open_at, TestLattice};
use lattice_core::{wal_path_for, Config, Lattice, LatticeResult, NodeKind};
use lattice_storage::{StorageBackend, StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// The files of a lattice as they were at one instant.
pub struct CrashImage {
    path: PathBuf,
    _dir: TempDir,
}

impl CrashImage {
    /// Copies the snapshot and WAL at `path` into a fresh directory. The
    /// lock file is not copied.
    pub fn capture(path: &Path) -> std::io::Result<Self> {
        let dir = TempDir::new()?;
        let file_name = path.file_name().unwrap_or_else(|| "agent.lattice".as_ref());
        let image_path = dir.path().join(file_name);

        if path.exists() {
            fs::copy(path, &image_path)?;
        }
        let wal = wal_path_for(path);
        if wal.exists() {
            fs::copy(&wal, wal_path_for(&image_path))?;
        }

        Ok(Self {
            path: image_path,
            _dir: dir,
        })
    }

    /// Snapshot path inside the image.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the image, running recovery.
    pub fn open(&self, config: Config) -> LatticeResult<Lattice> {
        open_at(&self.path, config)
    }
}

/// Size of the WAL next to `path`, 0 if absent.
pub fn wal_len(path: &Path) -> u64 {
    fs::metadata(wal_path_for(path)).map_or(0, |m| m.len())
}

/// Removes the last `bytes` bytes of the WAL, as a write cut short would.
pub fn truncate_wal_tail(path: &Path, bytes: u64) -> std::io::Result<()> {
    let wal = OpenOptions::new().write(true).open(wal_path_for(path))?;
    let len = wal.metadata()?.len();
    wal.set_len(len.saturating_sub(bytes))?;
    wal.sync_all()
}

/// Flips every bit of the WAL byte at `offset`.
pub fn corrupt_wal_byte(path: &Path, offset: u64) -> std::io::Result<()> {
    let wal = wal_path_for(path);
    let mut bytes = fs::read(&wal)?;
    let index = usize::try_from(offset)
        .ok()
        .filter(|&i| i < bytes.len())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "offset past end of WAL"))?;
    bytes[index] ^= 0xFF;
    fs::write(&wal, bytes)
}

/// Appends raw bytes to the WAL.
pub fn append_to_wal(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut wal = OpenOptions::new().append(true).create(true).open(wal_path_for(path))?;
    wal.write_all(bytes)?;
    wal.sync_all()
}

#[derive(Debug)]
struct CrashState {
    data: Vec<u8>,
    crash_after: usize,
    crashed: bool,
    fail_on_sync: bool,
}

/// A storage backend that stops accepting bytes at a chosen point.
///
/// A write crossing the crash point keeps the bytes before it and fails,
/// leaving a torn frame exactly like an interrupted `write`.
pub struct CrashableBackend {
    state: Arc<Mutex<CrashState>>,
}

/// Controls and inspects a [`CrashableBackend`] after it has been handed to
/// a WAL.
#[derive(Clone)]
pub struct CrashProbe {
    state: Arc<Mutex<CrashState>>,
}

impl CrashableBackend {
    /// Creates an empty backend and its probe.
    pub fn new() -> (Self, CrashProbe) {
        let state = Arc::new(Mutex::new(CrashState {
            data: Vec::new(),
            crash_after: usize::MAX,
            crashed: false,
            fail_on_sync: false,
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            CrashProbe { state },
        )
    }
}

impl CrashProbe {
    /// Crash once the backend holds `bytes` bytes.
    pub fn crash_after(&self, bytes: usize) {
        self.state.lock().crash_after = bytes;
    }

    /// Sets whether sync and flush should fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.state.lock().fail_on_sync = fail;
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.state.lock().crashed
    }

    /// Bytes that reached the backend.
    pub fn image(&self) -> Vec<u8> {
        self.state.lock().data.clone()
    }
}

fn simulated(what: &str) -> StorageError {
    StorageError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("simulated crash during {what}"),
    ))
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let state = self.state.lock();
        let size = state.data.len() as u64;
        let end = offset.saturating_add(len as u64);
        if end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        let start = offset as usize;
        Ok(state.data[start..start + len].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let mut state = self.state.lock();
        if state.crashed {
            return Err(simulated("write"));
        }

        let offset = state.data.len();
        if offset + bytes.len() > state.crash_after {
            let partial = state.crash_after.saturating_sub(offset);
            state.data.extend_from_slice(&bytes[..partial]);
            state.crashed = true;
            return Err(simulated("partial write"));
        }

        state.data.extend_from_slice(bytes);
        Ok(offset as u64)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.state.lock().fail_on_sync {
            return Err(simulated("flush"));
        }
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.state.lock().data.len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        let mut state = self.state.lock();
        if state.fail_on_sync {
            state.crashed = true;
            return Err(simulated("sync"));
        }
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut state = self.state.lock();
        let size = state.data.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }
        state.data.truncate(new_size as usize);
        Ok(())
    }
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Records expected after recovery.
    pub expected_nodes: u64,
    /// Records found after recovery.
    pub actual_nodes: u64,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    fn check(description: &str, expected: u64, actual: u64) -> Self {
        Self {
            passed: expected == actual,
            description: description.to_string(),
            expected_nodes: expected,
            actual_nodes: actual,
            error: (expected != actual).then(|| "record count mismatch after recovery".to_string()),
        }
    }

    fn error(description: &str, expected: u64, error: &dyn std::fmt::Display) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            expected_nodes: expected,
            actual_nodes: 0,
            error: Some(error.to_string()),
        }
    }
}

/// Runs crash scenarios against on-disk lattices.
#[derive(Default)]
pub struct CrashRecoveryHarness {
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
}

type Scenario = Result<CrashRecoveryResult, Box<dyn std::error::Error>>;

impl CrashRecoveryHarness {
    /// Creates a new harness.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, description: &str, expected: u64, outcome: Scenario) -> CrashRecoveryResult {
        let result =
            outcome.unwrap_or_else(|e| CrashRecoveryResult::error(description, expected, &e));
        self.results.push(result.clone());
        result
    }

    fn add_values(lattice: &Lattice, prefix: &str, count: u64) -> LatticeResult<()> {
        for i in 0..count {
            lattice.add_node(&format!("{prefix}{i}"), &i.to_le_bytes(), NodeKind::Primitive)?;
        }
        Ok(())
    }

    /// Flushed entries are replayed from the WAL.
    pub fn test_flushed_writes_survive(&mut self) -> CrashRecoveryResult {
        const DESCRIPTION: &str = "Flushed writes survive a crash";
        let outcome = (|| -> Scenario {
            let test = TestLattice::file();
            Self::add_values(test.lattice(), "K:", 25)?;
            test.flush()?;

            let image = CrashImage::capture(test.path().ok_or("file lattice has a path")?)?;
            let recovered = image.open(Config::default())?;
            let replayed = recovered.open_report().wal.replayed;
            Ok(CrashRecoveryResult::check(DESCRIPTION, 25, replayed))
        })();
        self.record(DESCRIPTION, 25, outcome)
    }

    /// Entries still in the write buffer are lost and nothing else is.
    pub fn test_buffered_writes_lost(&mut self) -> CrashRecoveryResult {
        const DESCRIPTION: &str = "Buffered writes are lost, flushed writes kept";
        let outcome = (|| -> Scenario {
            let test = TestLattice::file_with(Config::default().wal_buffer_limit(usize::MAX));
            Self::add_values(test.lattice(), "F:", 10)?;
            test.flush()?;
            Self::add_values(test.lattice(), "B:", 10)?;

            let image = CrashImage::capture(test.path().ok_or("file lattice has a path")?)?;
            let recovered = image.open(Config::default())?;
            if recovered.get_by_name("B:0")?.is_some() {
                return Err("buffered entry reached disk".into());
            }
            Ok(CrashRecoveryResult::check(DESCRIPTION, 10, recovered.node_count()))
        })();
        self.record(DESCRIPTION, 10, outcome)
    }

    /// A frame cut short by the crash is dropped; earlier entries survive.
    pub fn test_torn_tail_cut(&mut self) -> CrashRecoveryResult {
        const DESCRIPTION: &str = "Torn WAL tail is cut on recovery";
        let outcome = (|| -> Scenario {
            let test = TestLattice::file();
            Self::add_values(test.lattice(), "T:", 8)?;
            test.flush()?;

            let image = CrashImage::capture(test.path().ok_or("file lattice has a path")?)?;
            truncate_wal_tail(image.path(), 7)?;
            let torn_len = wal_len(image.path());

            let recovered = image.open(Config::default())?;
            if wal_len(image.path()) >= torn_len {
                return Err("torn frame was not cut".into());
            }
            Ok(CrashRecoveryResult::check(DESCRIPTION, 7, recovered.node_count()))
        })();
        self.record(DESCRIPTION, 7, outcome)
    }

    /// Records from the snapshot and from the WAL written after it are merged.
    pub fn test_crash_after_checkpoint(&mut self) -> CrashRecoveryResult {
        const DESCRIPTION: &str = "Checkpoint plus later WAL entries recover";
        let outcome = (|| -> Scenario {
            let test = TestLattice::file();
            Self::add_values(test.lattice(), "S:", 12)?;
            test.checkpoint()?;
            Self::add_values(test.lattice(), "W:", 6)?;
            test.flush()?;

            let image = CrashImage::capture(test.path().ok_or("file lattice has a path")?)?;
            let recovered = image.open(Config::default())?;
            let report = recovered.open_report();
            if report.snapshot.loaded != 12 || report.wal.replayed != 6 {
                return Err(format!(
                    "loaded {} from snapshot and {} from WAL",
                    report.snapshot.loaded, report.wal.replayed
                )
                .into());
            }
            Ok(CrashRecoveryResult::check(DESCRIPTION, 18, recovered.node_count()))
        })();
        self.record(DESCRIPTION, 18, outcome)
    }

    /// Runs every scenario.
    pub fn run_all(&mut self) -> &[CrashRecoveryResult] {
        self.test_flushed_writes_survive();
        self.test_buffered_writes_lost();
        self.test_torn_tail_cut();
        self.test_crash_after_checkpoint();
        &self.results
    }

    /// Returns true if every recorded scenario passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::wal::{WalEntry, WalManager, WalOperation, WalTail};
    use lattice_core::{Node, NodeId, NodeLink, SequenceNumber};
    use lattice_storage::InMemoryBackend;

    #[test]
    fn test_harness_scenarios_pass() {
        let mut harness = CrashRecoveryHarness::new();
        let results = harness.run_all();
        assert_eq!(results.len(), 4);
        for result in results {
            assert!(result.passed, "{}: {:?}", result.description, result.error);
        }
    }

    #[test]
    fn test_crashable_backend_tears_frame() {
        let (backend, probe) = CrashableBackend::new();
        let wal = WalManager::new(Box::new(backend), false, 0);
        for i in 1..=3u64 {
            let node = Node::new(NodeId::new(i), NodeKind::Primitive, format!("n{i}"), vec![1; 32]);
            wal.append(WalOperation::Add, &node).unwrap();
        }

        probe.crash_after(probe.image().len() + 10);
        let node = Node::new(NodeId::new(4), NodeKind::Primitive, "n4", vec![1; 32]);
        assert!(wal.append(WalOperation::Add, &node).is_err());
        assert!(probe.has_crashed());

        let recovered = WalManager::new(Box::new(InMemoryBackend::with_data(probe.image())), false, 0);
        let report = recovered.recover(|_| Ok(lattice_core::wal::ReplayOutcome::Applied)).unwrap();
        assert_eq!(report.replayed, 3);
        assert!(matches!(report.tail, WalTail::Torn { .. }));
    }

    #[test]
    fn test_corrupt_byte_skips_one_entry() {
        let test = TestLattice::file();
        for i in 0..4u8 {
            test.add_node(&format!("c{i}"), &[i; 40], NodeKind::Primitive).unwrap();
        }
        test.flush().unwrap();

        let image = CrashImage::capture(test.path().unwrap()).unwrap();
        // Last byte of the first frame belongs to its checksum.
        let frame_len = wal_len(image.path()) / 4;
        corrupt_wal_byte(image.path(), frame_len - 1).unwrap();

        let recovered = image.open(Config::default()).unwrap();
        assert_eq!(recovered.open_report().wal.discarded, 1);
        assert!(recovered.get_by_name("c0").unwrap().is_none());
        assert!(recovered.get_by_name("c3").unwrap().is_some());
    }

    #[test]
    fn test_corrupt_length_loses_only_that_entry() {
        let test = TestLattice::file();
        for i in 0..50u8 {
            test.add_node(&format!("c{i:02}"), &[i; 40], NodeKind::Primitive).unwrap();
        }
        test.flush().unwrap();

        let image = CrashImage::capture(test.path().unwrap()).unwrap();
        let before = wal_len(image.path());
        let frame_len = before / 50;
        // Low byte of the second frame's payload length.
        let mut wal = fs::read(wal_path_for(image.path())).unwrap();
        wal[frame_len as usize + 7] ^= 0x01;
        fs::write(wal_path_for(image.path()), wal).unwrap();

        let recovered = image.open(Config::default()).unwrap();
        assert_eq!(recovered.open_report().wal.discarded, 1);
        assert_eq!(recovered.open_report().wal.tail, WalTail::Clean);
        assert!(recovered.get_by_name("c01").unwrap().is_none());
        let found = (0..50u8)
            .filter(|i| recovered.get_by_name(&format!("c{i:02}")).unwrap().is_some())
            .count();
        assert_eq!(found, 49);
        assert_eq!(wal_len(image.path()), before);
    }

    #[test]
    fn test_wild_chunk_id_in_wal_is_skipped() {
        let config = Config::default().max_nodes(100);
        let test = TestLattice::file_with(config.clone());
        test.add_node("head", b"h", NodeKind::Primitive).unwrap();
        test.flush().unwrap();

        let image = CrashImage::capture(test.path().unwrap()).unwrap();
        let wild = Node {
            id: NodeId::new(1 << 20),
            kind: NodeKind::Primitive,
            name: String::new(),
            payload: vec![7; 16],
            link: NodeLink::Chunk {
                parent_id: NodeId::new(1),
                sequence_index: 0,
            },
        };
        let frame = WalEntry::frame_for(SequenceNumber::new(1_000), WalOperation::Add, &wild);
        append_to_wal(image.path(), &frame).unwrap();

        let recovered = image.open(config).unwrap();
        assert_eq!(recovered.open_report().wal.discarded, 1);
        assert_eq!(recovered.node_count(), 1);
        assert_eq!(
            recovered.add_node("next", b"n", NodeKind::Primitive).unwrap(),
            NodeId::new(2)
        );
    }
}
