//! The lattice handle and recovery.

use crate::arena::NodeArena;
use crate::chunk;
use crate::config::Config;
use crate::error::{LatticeError, LatticeResult};
use crate::files::LatticeFiles;
use crate::index::PrefixIndex;
use crate::license::{unix_now, LicenseVerifier, Tier, TierGuard, TierResolution};
use crate::node::Node;
use crate::snapshot::{LoadedSnapshot, SnapshotManager, SnapshotReport};
use crate::stats::{LatticeStats, StatsSnapshot};
use crate::types::{NodeId, NodeKind};
use crate::usage::{self, UsageDispatcher, UsageReport, UsageReporter};
use crate::wal::{RecoveryReport, ReplayOutcome, WalEntry, WalManager, WalOperation};
use lattice_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;

/// What happened while opening a lattice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenReport {
    /// Snapshot load result.
    pub snapshot: SnapshotReport,
    /// WAL replay result.
    pub wal: RecoveryReport,
    /// License resolution.
    pub license: TierResolution,
}

/// Result of a prefix query with its index cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixQuery {
    /// Newest node per matching name, in name order.
    pub nodes: Vec<Node>,
    /// Index keys examined.
    pub keys_visited: usize,
}

struct LatticeState {
    arena: NodeArena,
    index: PrefixIndex,
    guard: TierGuard,
}

/// An open lattice.
///
/// Writes pass the tier guard, are appended to the WAL, then applied to the
/// arena and prefix index. Reads go straight to the arena and index.
///
/// # Opening
///
/// ```rust,ignore
/// use lattice_core::{Config, Lattice, NodeKind};
/// use std::path::Path;
///
/// let lattice = Lattice::open(Path::new("agent.lattice"), Config::default())?;
/// let id = lattice.add_node("P:deploy:1", b"tag first", NodeKind::Learning)?;
/// let hits = lattice.find_by_prefix("P:deploy:", 10)?;
/// lattice.checkpoint()?;
/// ```
///
/// The handle holds an exclusive lock on its files. Dropping it flushes the
/// WAL; call [`Lattice::checkpoint`] to consolidate into the snapshot.
pub struct Lattice {
    config: Config,
    /// File set holding the lock. `None` for in-memory lattices.
    files: Option<LatticeFiles>,
    state: RwLock<LatticeState>,
    wal: WalManager,
    snapshots: SnapshotManager,
    stats: LatticeStats,
    usage: UsageDispatcher,
    hardware_id: String,
    open_report: OpenReport,
    is_open: RwLock<bool>,
}

impl Lattice {
    /// Opens or creates the lattice at `path`.
    ///
    /// Loads the snapshot, replays the WAL, and resolves the license key.
    ///
    /// # Errors
    ///
    /// Returns `LatticeLocked` if another handle has the lattice open,
    /// `InvalidFormat` if the snapshot is not a lattice snapshot, `NotFound`
    /// if it does not exist and `create_if_missing` is false, or an I/O
    /// error.
    pub fn open(path: &Path, config: Config) -> LatticeResult<Self> {
        Self::open_files(path, config, &LicenseVerifier::product()?)
    }

    /// Opens an in-memory lattice. Nothing survives the handle.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero capacity.
    pub fn open_in_memory(config: Config) -> LatticeResult<Self> {
        Self::assemble(config, None, &LicenseVerifier::product()?)
    }

    /// Opens a lattice verifying license keys with `verifier`.
    ///
    /// # Errors
    ///
    /// As [`Lattice::open`].
    #[cfg(any(test, feature = "test-keys"))]
    pub fn open_with_verifier(
        path: &Path,
        config: Config,
        verifier: &LicenseVerifier,
    ) -> LatticeResult<Self> {
        Self::open_files(path, config, verifier)
    }

    /// Opens an in-memory lattice verifying license keys with `verifier`.
    ///
    /// # Errors
    ///
    /// As [`Lattice::open_in_memory`].
    #[cfg(any(test, feature = "test-keys"))]
    pub fn open_in_memory_with_verifier(
        config: Config,
        verifier: &LicenseVerifier,
    ) -> LatticeResult<Self> {
        Self::assemble(config, None, verifier)
    }

    fn open_files(path: &Path, config: Config, verifier: &LicenseVerifier) -> LatticeResult<Self> {
        let files = LatticeFiles::open(path, config.create_if_missing)?;
        Self::assemble(config, Some(files), verifier)
    }

    fn assemble(
        config: Config,
        files: Option<LatticeFiles>,
        verifier: &LicenseVerifier,
    ) -> LatticeResult<Self> {
        if config.max_nodes == 0 {
            return Err(LatticeError::invalid_argument("max_nodes must be positive"));
        }

        let license = verifier.resolve(config.license_key.as_deref(), unix_now());
        if let Some(reason) = &license.rejection {
            tracing::warn!(%reason, "license key rejected; running as free tier");
        }
        let guard = TierGuard::new(license.tier, config.evaluation_mode);

        let (wal_backend, snapshots): (Box<dyn StorageBackend>, SnapshotManager) = match &files {
            Some(files) => (
                Box::new(FileBackend::open(&files.wal_path())?),
                SnapshotManager::for_files(files),
            ),
            None => (Box::new(InMemoryBackend::new()), SnapshotManager::in_memory()),
        };
        let wal = WalManager::new(wal_backend, config.sync_on_write, config.wal_buffer_limit);

        let LoadedSnapshot {
            mut arena,
            report: snapshot_report,
        } = snapshots.load(config.max_nodes)?;

        let mut index = PrefixIndex::new();
        for node in arena.iter().filter(|n| !n.is_chunk()) {
            index.insert(&node.name, node.id);
        }

        let wal_report = wal.recover(|entry| replay_entry(&mut arena, &mut index, entry))?;

        let stats = LatticeStats::new();
        stats.record_recovery(
            wal_report.replayed,
            wal_report.discarded,
            snapshot_report.corrupt,
        );

        tracing::info!(
            path = ?files.as_ref().map(LatticeFiles::snapshot_path),
            loaded = snapshot_report.loaded,
            replayed = wal_report.replayed,
            skipped = wal_report.already_applied,
            discarded = wal_report.discarded,
            corrupt = snapshot_report.corrupt,
            total_nodes = arena.len(),
            tier = %guard.tier(),
            evaluation_mode = guard.evaluation_mode(),
            "lattice opened"
        );

        Ok(Self {
            config,
            files,
            state: RwLock::new(LatticeState {
                arena,
                index,
                guard,
            }),
            wal,
            snapshots,
            stats,
            usage: UsageDispatcher::new(license.key_present, usage::USAGE_QUEUE_CAPACITY),
            hardware_id: usage::hardware_id(),
            open_report: OpenReport {
                snapshot: snapshot_report,
                wal: wal_report,
                license,
            },
            is_open: RwLock::new(true),
        })
    }

    /// Stores an inline node and returns its id.
    ///
    /// Writing under an existing name adds a newer version; queries return
    /// the newest one.
    ///
    /// # Errors
    ///
    /// Returns `TierLimitExceeded` once the tier ceiling is reached (checked
    /// first), `CapacityExceeded` when the arena is full, `NameTooLong`,
    /// `PayloadTooLarge`, `InvalidArgument` for an empty name, or a WAL error.
    pub fn add_node(&self, name: &str, payload: &[u8], kind: NodeKind) -> LatticeResult<NodeId> {
        self.ensure_open()?;

        let (id, total) = {
            let mut state = self.state.write();
            let id = self
                .write_inline(&mut state, name, payload, kind)
                .inspect_err(|e| self.stats.record_rejection(e))?;
            (id, state.arena.len())
        };

        self.stats.record_add(payload.len() as u64);
        self.after_write(total);
        Ok(id)
    }

    fn write_inline(
        &self,
        state: &mut LatticeState,
        name: &str,
        payload: &[u8],
        kind: NodeKind,
    ) -> LatticeResult<NodeId> {
        state.guard.guard_before_add(state.arena.len())?;
        check_name(name)?;
        let node = state.arena.prepare(name, payload, kind)?;
        let operation = operation_for(&state.index, name);

        self.wal.append(operation, &node)?;
        self.stats.record_wal_written(1);

        let id = node.id;
        state.arena.insert(node)?;
        state.index.insert(name, id);
        Ok(id)
    }

    /// Stores a payload of any size across chunk records and returns the
    /// head id.
    ///
    /// # Errors
    ///
    /// As [`Lattice::add_node`]; the tier and capacity checks count the head
    /// and every chunk.
    pub fn add_node_chunked(&self, name: &str, bytes: &[u8], kind: NodeKind) -> LatticeResult<NodeId> {
        self.ensure_open()?;

        let (id, total) = {
            let mut state = self.state.write();
            let id = self
                .write_chunked(&mut state, name, bytes, kind)
                .inspect_err(|e| self.stats.record_rejection(e))?;
            (id, state.arena.len())
        };

        self.stats.record_chunked_add(bytes.len() as u64);
        self.after_write(total);
        Ok(id)
    }

    fn write_chunked(
        &self,
        state: &mut LatticeState,
        name: &str,
        bytes: &[u8],
        kind: NodeKind,
    ) -> LatticeResult<NodeId> {
        let records = chunk::chunk_count(bytes.len()) as u64 + 1;
        state.guard.guard_before_add_many(state.arena.len(), records)?;
        check_name(name)?;
        state.arena.ensure_room(records)?;

        let nodes = chunk::split(state.arena.next_id(), name, kind, bytes)?;
        let operation = operation_for(&state.index, name);

        // Chunks first: a crash before the head is logged leaves no
        // visible write.
        let (head, chunks) = nodes
            .split_first()
            .ok_or_else(|| LatticeError::invalid_argument("empty chunk plan"))?;
        let logged = chunks
            .iter()
            .try_for_each(|c| self.wal.append(WalOperation::Add, c).map(drop))
            .and_then(|()| self.wal.append(operation, head).map(drop));

        if let Err(e) = logged {
            // Some chunks may already be logged; never hand their ids out again.
            if let Some(last) = nodes.last() {
                state.arena.reserve_through(last.id);
            }
            return Err(e);
        }
        self.stats.record_wal_written(records);

        let head_id = head.id;
        for node in nodes {
            state.arena.insert(node)?;
        }
        state.index.insert(name, head_id);
        Ok(head_id)
    }

    fn after_write(&self, total_nodes: u64) {
        if self.open_report.license.key_present {
            let report = UsageReport {
                node_count: total_nodes,
                tier: self.tier(),
                hardware_id: self.hardware_id.clone(),
            };
            self.usage.send(report);
        }

        let threshold = self.config.auto_checkpoint_entries;
        if threshold > 0 && self.wal.entries_since_checkpoint() >= threshold {
            if let Err(e) = self.checkpoint() {
                tracing::warn!(error = %e, "automatic checkpoint failed");
            }
        }
    }

    /// Looks up a node by id.
    ///
    /// # Errors
    ///
    /// Returns `LatticeClosed` if the handle is closed.
    pub fn get_node(&self, id: NodeId) -> LatticeResult<Option<Node>> {
        self.ensure_open()?;
        let node = self.state.read().arena.get(id).cloned();
        self.record_read(node.as_ref());
        Ok(node)
    }

    /// Newest node stored under exactly `name`.
    ///
    /// # Errors
    ///
    /// Returns `LatticeClosed` if the handle is closed.
    pub fn get_by_name(&self, name: &str) -> LatticeResult<Option<Node>> {
        self.ensure_open()?;
        let node = {
            let state = self.state.read();
            state
                .index
                .latest(name)
                .and_then(|id| state.arena.get(id).cloned())
        };
        self.record_read(node.as_ref());
        Ok(node)
    }

    /// Every version stored under `name`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `LatticeClosed` if the handle is closed.
    pub fn history(&self, name: &str) -> LatticeResult<Vec<Node>> {
        self.ensure_open()?;
        let state = self.state.read();
        Ok(state
            .index
            .versions(name)
            .iter()
            .filter_map(|id| state.arena.get(*id).cloned())
            .collect())
    }

    /// Newest node for each name starting with `prefix`, in name order, at
    /// most `limit` of them.
    ///
    /// # Errors
    ///
    /// Returns `LatticeClosed` if the handle is closed.
    pub fn find_by_prefix(&self, prefix: &str, limit: usize) -> LatticeResult<Vec<Node>> {
        Ok(self.query_prefix(prefix, limit)?.nodes)
    }

    /// [`Lattice::find_by_prefix`] that also reports how many index keys
    /// the scan examined.
    ///
    /// # Errors
    ///
    /// Returns `LatticeClosed` if the handle is closed.
    pub fn query_prefix(&self, prefix: &str, limit: usize) -> LatticeResult<PrefixQuery> {
        self.ensure_open()?;
        let query = {
            let state = self.state.read();
            let (nodes, keys_visited) = state
                .index
                .scan_with(prefix, limit, |id| state.arena.get(id).cloned());
            PrefixQuery {
                nodes,
                keys_visited,
            }
        };
        self.stats.record_prefix_query(query.keys_visited);
        Ok(query)
    }

    /// Reassembles the payload stored under `id`.
    ///
    /// Inline nodes yield their payload; chunk heads yield the full
    /// reassembled payload.
    ///
    /// # Errors
    ///
    /// Returns `ChunkIntegrity` if the chain is broken, `InvalidArgument` if
    /// `id` names a chunk record.
    pub fn get_node_chunked(&self, id: NodeId) -> LatticeResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        let bytes = chunk::reassemble(&self.state.read().arena, id)?;
        if let Some(b) = &bytes {
            self.stats.record_read(b.len() as u64);
        }
        Ok(bytes)
    }

    /// Full value of the newest node under `name`, reassembled if chunked.
    ///
    /// # Errors
    ///
    /// As [`Lattice::get_node_chunked`].
    pub fn read_value(&self, name: &str) -> LatticeResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        let bytes = {
            let state = self.state.read();
            match state.index.latest(name) {
                Some(id) => chunk::reassemble(&state.arena, id)?,
                None => None,
            }
        };
        if let Some(b) = &bytes {
            self.stats.record_read(b.len() as u64);
        }
        Ok(bytes)
    }

    /// Forces buffered WAL entries to durable storage. The snapshot is not
    /// touched.
    ///
    /// # Errors
    ///
    /// Returns an error if the WAL cannot be written or synced.
    pub fn flush(&self) -> LatticeResult<()> {
        self.ensure_open()?;
        self.wal.flush()
    }

    /// Flushes the WAL and atomically writes a snapshot. The WAL is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the WAL flush or snapshot write fails; the
    /// previous snapshot is intact in that case.
    pub fn save(&self) -> LatticeResult<()> {
        self.ensure_open()?;
        let state = self.state.read();
        self.wal.flush()?;
        let summary = self.snapshots.save(&state.arena)?;
        self.stats.record_save();
        tracing::info!(records = summary.records, bytes = summary.bytes, "snapshot saved");
        Ok(())
    }

    /// Writes a consolidated snapshot and truncates the WAL.
    ///
    /// Every logged entry is already applied to the arena, so the snapshot
    /// covers the whole WAL. Holds the write lock throughout, so no add can
    /// interleave.
    ///
    /// # Errors
    ///
    /// Returns an error if the WAL flush, snapshot write or WAL truncation
    /// fails. A failure before truncation leaves the WAL intact.
    pub fn checkpoint(&self) -> LatticeResult<()> {
        self.ensure_open()?;
        let state = self.state.write();
        self.wal.flush()?;
        let summary = self.snapshots.save(&state.arena)?;
        self.wal.clear()?;
        self.stats.record_save();
        self.stats.record_checkpoint();
        tracing::info!(
            records = summary.records,
            bytes = summary.bytes,
            "checkpoint complete"
        );
        Ok(())
    }

    /// Leaves evaluation mode. Succeeds only with a verified `Unlimited`
    /// key in a build without `fixed-capacity`; otherwise nothing changes.
    ///
    /// # Errors
    ///
    /// Returns `EvaluationModeLocked`.
    pub fn disable_evaluation_mode(&self) -> LatticeResult<()> {
        self.ensure_open()?;
        let mut state = self.state.write();
        let tier = state.guard.tier();
        state.guard.disable_evaluation_mode().inspect_err(|_| {
            tracing::warn!(%tier, "refused to disable evaluation mode");
        })
    }

    /// Closes the lattice, flushing the WAL.
    ///
    /// # Errors
    ///
    /// Returns an error if the WAL flush fails; the handle stays open then.
    pub fn close(&self) -> LatticeResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        self.wal.flush()?;
        *is_open = false;
        self.usage.shutdown();
        tracing::debug!("lattice closed");
        Ok(())
    }

    /// Checks if the lattice is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn ensure_open(&self) -> LatticeResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(LatticeError::LatticeClosed)
        }
    }

    fn record_read(&self, node: Option<&Node>) {
        self.stats
            .record_read(node.map_or(0, |n| n.payload.len() as u64));
    }

    /// Replaces the usage reporter. Reports are delivered on a background
    /// thread; [`Lattice::close`] waits for queued ones.
    pub fn set_usage_reporter(&self, reporter: Arc<dyn UsageReporter>) {
        self.usage.set_reporter(reporter);
    }

    /// The tier in force.
    #[must_use]
    pub fn tier(&self) -> Tier {
        self.state.read().guard.tier()
    }

    /// Whether the tier ceiling is enforced.
    #[must_use]
    pub fn evaluation_mode(&self) -> bool {
        self.state.read().guard.evaluation_mode()
    }

    /// Effective write ceiling: the smaller of physical capacity and the
    /// enforced tier ceiling.
    #[must_use]
    pub fn ceiling(&self) -> u64 {
        let state = self.state.read();
        state
            .guard
            .ceiling()
            .map_or(state.arena.max_nodes(), |c| c.min(state.arena.max_nodes()))
    }

    /// Ids handed out so far, chunk records included.
    #[must_use]
    pub fn node_count(&self) -> u64 {
        self.state.read().arena.len()
    }

    /// Records actually stored.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.state.read().arena.live_count()
    }

    /// Distinct names in the prefix index.
    #[must_use]
    pub fn name_count(&self) -> usize {
        self.state.read().index.len()
    }

    /// Physical capacity.
    #[must_use]
    pub fn max_nodes(&self) -> u64 {
        self.config.max_nodes
    }

    /// Current WAL size in bytes, buffered entries included.
    ///
    /// # Errors
    ///
    /// Returns an error if the WAL size cannot be read.
    pub fn wal_size(&self) -> LatticeResult<u64> {
        self.wal.size()
    }

    /// Statistics so far.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// What happened while opening.
    #[must_use]
    pub fn open_report(&self) -> &OpenReport {
        &self.open_report
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Snapshot path, `None` for in-memory lattices.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.files.as_ref().map(LatticeFiles::snapshot_path)
    }
}

fn check_name(name: &str) -> LatticeResult<()> {
    if name.is_empty() {
        return Err(LatticeError::invalid_argument("node name must not be empty"));
    }
    Ok(())
}

fn operation_for(index: &PrefixIndex, name: &str) -> WalOperation {
    if index.contains(name) {
        WalOperation::Update
    } else {
        WalOperation::Add
    }
}

fn replay_entry(
    arena: &mut NodeArena,
    index: &mut PrefixIndex,
    entry: &WalEntry,
) -> LatticeResult<ReplayOutcome> {
    if arena.contains(entry.node.id) {
        return Ok(ReplayOutcome::AlreadyApplied);
    }
    if !arena.insert(entry.node.clone())? {
        return Ok(ReplayOutcome::AlreadyApplied);
    }
    if !entry.node.is_chunk() {
        index.insert(&entry.node.name, entry.node.id);
    }
    Ok(ReplayOutcome::Applied)
}

impl std::fmt::Debug for Lattice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lattice")
            .field("path", &self.path())
            .field("is_open", &self.is_open())
            .field("node_count", &self.node_count())
            .field("tier", &self.tier())
            .finish_non_exhaustive()
    }
}

impl Drop for Lattice {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
