//! Usage reporting seam.
//!
//! When a license key is supplied, every successful write queues a
//! [`UsageReport`] for the configured [`UsageReporter`]. Reports are handed
//! to a background thread over a bounded channel; a full queue drops the
//! report instead of waiting. The trait cannot return an error, and a
//! panicking reporter is caught and logged.

use crate::license::Tier;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Reports queued before further ones are dropped.
pub const USAGE_QUEUE_CAPACITY: usize = 64;

/// Snapshot of usage sent after a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageReport {
    /// Ids handed out so far.
    pub node_count: u64,
    /// Tier in force.
    pub tier: Tier,
    /// Stable, anonymised machine identifier.
    pub hardware_id: String,
}

/// Receives usage reports on the lattice's reporting thread, never on a
/// writer's thread.
pub trait UsageReporter: Send + Sync {
    /// Handles one report.
    fn report(&self, report: &UsageReport);
}

/// Default reporter: emits a `tracing` event and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl UsageReporter for TracingReporter {
    fn report(&self, report: &UsageReport) {
        tracing::trace!(
            node_count = report.node_count,
            tier = %report.tier,
            hardware_id = %report.hardware_id,
            "usage report"
        );
    }
}

/// Calls `reporter`, swallowing any panic.
pub(crate) fn deliver(reporter: &dyn UsageReporter, report: &UsageReport) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| reporter.report(report)));
    if outcome.is_err() {
        tracing::warn!("usage reporter panicked; report dropped");
    }
}

/// Background delivery of usage reports.
pub(crate) struct UsageDispatcher {
    reporter: Arc<RwLock<Arc<dyn UsageReporter>>>,
    sender: Mutex<Option<SyncSender<UsageReport>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl UsageDispatcher {
    /// Starts the reporting thread when `enabled`; otherwise reports are
    /// ignored.
    pub(crate) fn new(enabled: bool, capacity: usize) -> Self {
        let reporter: Arc<RwLock<Arc<dyn UsageReporter>>> =
            Arc::new(RwLock::new(Arc::new(TracingReporter)));
        let (sender, worker) = if enabled {
            Self::spawn(Arc::clone(&reporter), capacity)
        } else {
            (None, None)
        };
        Self {
            reporter,
            sender: Mutex::new(sender),
            worker: Mutex::new(worker),
            dropped: AtomicU64::new(0),
        }
    }

    fn spawn(
        reporter: Arc<RwLock<Arc<dyn UsageReporter>>>,
        capacity: usize,
    ) -> (Option<SyncSender<UsageReport>>, Option<JoinHandle<()>>) {
        let (tx, rx) = mpsc::sync_channel::<UsageReport>(capacity);
        let spawned = thread::Builder::new()
            .name("lattice-usage".to_owned())
            .spawn(move || {
                while let Ok(report) = rx.recv() {
                    let current = Arc::clone(&reporter.read());
                    deliver(current.as_ref(), &report);
                }
            });
        match spawned {
            Ok(handle) => (Some(tx), Some(handle)),
            Err(e) => {
                tracing::warn!(error = %e, "usage reporting disabled: thread spawn failed");
                (None, None)
            }
        }
    }

    pub(crate) fn set_reporter(&self, reporter: Arc<dyn UsageReporter>) {
        *self.reporter.write() = reporter;
    }

    /// Queues `report` without waiting.
    pub(crate) fn send(&self, report: UsageReport) {
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return;
        };
        match tx.try_send(report) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("usage queue full; report dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Reports dropped because the queue was full or the thread had exited.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stops accepting reports and waits for queued ones to be delivered.
    pub(crate) fn shutdown(&self) {
        self.sender.lock().take();
        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            if handle.join().is_err() {
                tracing::warn!("usage reporting thread panicked");
            }
        }
    }
}

impl Drop for UsageDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for UsageDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageDispatcher")
            .field("running", &self.sender.lock().is_some())
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

const MACHINE_ID_FILES: [&str; 2] = ["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// Derives a hardware id: the first 16 bytes of SHA-256 over the machine id
/// (or host name when none is available), hex encoded.
#[must_use]
pub fn hardware_id() -> String {
    let source = MACHINE_ID_FILES
        .iter()
        .find_map(|path| std::fs::read_to_string(path).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    hardware_id_from(&source)
}

fn hardware_id_from(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"lattice-hwid:");
    hasher.update(source.as_bytes());
    let digest = hasher.finalize();

    let mut out = String::with_capacity(32);
    for byte in &digest[..16] {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recording(Mutex<Vec<UsageReport>>);

    impl UsageReporter for Recording {
        fn report(&self, report: &UsageReport) {
            self.0.lock().push(report.clone());
        }
    }

    struct Panicking;

    impl UsageReporter for Panicking {
        fn report(&self, _: &UsageReport) {
            panic!("endpoint unreachable");
        }
    }

    fn sample() -> UsageReport {
        UsageReport {
            node_count: 3,
            tier: Tier::Tier1M,
            hardware_id: hardware_id_from("test-machine"),
        }
    }

    #[test]
    fn hardware_id_is_stable_hex() {
        let a = hardware_id_from("machine-a");
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, hardware_id_from("machine-a"));
        assert_ne!(a, hardware_id_from("machine-b"));
        assert_eq!(hardware_id().len(), 32);
    }

    #[test]
    fn deliver_reaches_reporter() {
        let recording = Recording::default();
        deliver(&recording, &sample());
        assert_eq!(recording.0.lock().len(), 1);
    }

    #[test]
    fn panicking_reporter_is_contained() {
        deliver(&Panicking, &sample());
        deliver(&TracingReporter, &sample());
    }

    /// Blocks every report until the gate sender is dropped.
    struct Gated {
        gate: Mutex<mpsc::Receiver<()>>,
        seen: AtomicU64,
    }

    impl UsageReporter for Gated {
        fn report(&self, _: &UsageReport) {
            let _ = self.gate.lock().recv();
            self.seen.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn dispatcher_delivers_queued_reports_on_shutdown() {
        let recording = Arc::new(Recording::default());
        let dispatcher = UsageDispatcher::new(true, USAGE_QUEUE_CAPACITY);
        dispatcher.set_reporter(recording.clone());
        for _ in 0..5 {
            dispatcher.send(sample());
        }
        dispatcher.shutdown();
        assert_eq!(recording.0.lock().len(), 5);
        assert_eq!(dispatcher.dropped(), 0);
    }

    #[test]
    fn blocked_reporter_never_blocks_sender() {
        let (open_gate, gate) = mpsc::channel::<()>();
        let gated = Arc::new(Gated {
            gate: Mutex::new(gate),
            seen: AtomicU64::new(0),
        });
        let dispatcher = UsageDispatcher::new(true, 4);
        dispatcher.set_reporter(gated.clone());

        for _ in 0..50 {
            dispatcher.send(sample());
        }
        assert!(dispatcher.dropped() >= 50 - 4 - 1);

        drop(open_gate);
        dispatcher.shutdown();
        assert_eq!(gated.seen.load(Ordering::Relaxed) + dispatcher.dropped(), 50);
    }

    #[test]
    fn disabled_dispatcher_ignores_reports() {
        let recording = Arc::new(Recording::default());
        let dispatcher = UsageDispatcher::new(false, USAGE_QUEUE_CAPACITY);
        dispatcher.set_reporter(recording.clone());
        dispatcher.send(sample());
        dispatcher.shutdown();
        assert!(recording.0.lock().is_empty());
        assert_eq!(dispatcher.dropped(), 0);
    }
}
