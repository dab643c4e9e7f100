//! Test fixtures and lattice helpers.
//!
//! Provides on-disk lattices in temporary directories, a license issuer
//! whose keys the fixtures accept, and common test scenarios.

use ed25519_dalek::SigningKey;
use lattice_core::{Config, Lattice, LicenseKey, LicenseVerifier, NodeKind, Tier};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Signs license keys for tests.
///
/// Lattices opened through the fixtures verify against this issuer instead
/// of the product key.
#[derive(Debug, Clone)]
pub struct TestIssuer {
    signing_key: SigningKey,
}

impl TestIssuer {
    /// Fixed secret so keys are stable across runs.
    pub const SECRET: [u8; 32] = [42u8; 32];

    /// Creates the issuer.
    pub fn new() -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&Self::SECRET),
        }
    }

    /// Verifier matching this issuer.
    pub fn verifier(&self) -> LicenseVerifier {
        LicenseVerifier::from_public_key(&self.signing_key.verifying_key().to_bytes())
            .expect("test issuer public key is valid")
    }

    /// A non-expiring key for `tier`, base64 encoded.
    pub fn key(&self, tier: Tier) -> String {
        self.key_expiring(tier, 0)
    }

    /// A key for `tier` expiring at `expiry` (unix seconds).
    pub fn key_expiring(&self, tier: Tier, expiry: u32) -> String {
        LicenseKey::issue(tier, expiry, &self.signing_key).encode()
    }
}

impl Default for TestIssuer {
    fn default() -> Self {
        Self::new()
    }
}

/// Every tier, lowest first.
pub const ALL_TIERS: [Tier; 6] = [
    Tier::Free,
    Tier::Tier100K,
    Tier::Tier1M,
    Tier::Tier10M,
    Tier::Tier50M,
    Tier::Unlimited,
];

/// A test lattice with automatic cleanup.
pub struct TestLattice {
    /// The lattice instance. `None` only while reopening.
    lattice: Option<Lattice>,
    config: Config,
    path: Option<PathBuf>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestLattice {
    /// Creates a new in-memory test lattice.
    pub fn memory() -> Self {
        Self::memory_with(Config::default())
    }

    /// Creates a new in-memory test lattice with `config`.
    pub fn memory_with(config: Config) -> Self {
        let lattice = Lattice::open_in_memory_with_verifier(config.clone(), &TestIssuer::new().verifier())
            .expect("Failed to open in-memory lattice");
        Self {
            lattice: Some(lattice),
            config,
            path: None,
            _temp_dir: None,
        }
    }

    /// Creates a new file-based test lattice.
    pub fn file() -> Self {
        Self::file_with(Config::default())
    }

    /// Creates a new file-based test lattice with `config`.
    pub fn file_with(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("agent.lattice");
        let lattice = open_at(&path, config.clone()).expect("Failed to open file lattice");
        Self {
            lattice: Some(lattice),
            config,
            path: Some(path),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Creates a file-based lattice licensed for `tier`.
    pub fn licensed(tier: Tier, config: Config) -> Self {
        Self::file_with(config.license_key(TestIssuer::new().key(tier)))
    }

    /// Returns the snapshot path if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The open lattice.
    pub fn lattice(&self) -> &Lattice {
        self.lattice.as_ref().expect("lattice is open")
    }

    /// Drops the handle without a checkpoint, the way a process exit would.
    pub fn close(&mut self) {
        self.lattice.take();
    }

    /// Closes and reopens the lattice from its files.
    ///
    /// # Panics
    ///
    /// Panics for in-memory lattices or if reopening fails.
    pub fn reopen(&mut self) {
        let path = self.path.clone().expect("in-memory lattices cannot be reopened");
        self.close();
        self.lattice = Some(open_at(&path, self.config.clone()).expect("Failed to reopen lattice"));
    }
}

impl std::ops::Deref for TestLattice {
    type Target = Lattice;

    fn deref(&self) -> &Self::Target {
        self.lattice()
    }
}

/// Opens `path` verifying keys with the test issuer.
pub fn open_at(path: &Path, config: Config) -> lattice_core::LatticeResult<Lattice> {
    Lattice::open_with_verifier(path, config, &TestIssuer::new().verifier())
}

/// Runs a test with a temporary in-memory lattice.
///
/// # Example
///
/// ```rust,ignore
/// use lattice_testkit::with_temp_lattice;
///
/// #[test]
/// fn my_test() {
///     with_temp_lattice(|lattice| {
///         lattice.add_node("k", b"v", NodeKind::Primitive).unwrap();
///     });
/// }
/// ```
pub fn with_temp_lattice<F, R>(f: F) -> R
where
    F: FnOnce(&Lattice) -> R,
{
    let test = TestLattice::memory();
    f(test.lattice())
}

/// Runs a test with a temporary file-based lattice.
pub fn with_file_lattice<F, R>(f: F) -> R
where
    F: FnOnce(&Lattice, &Path) -> R,
{
    let test = TestLattice::file();
    let path = test.path().expect("File lattice should have a path").to_path_buf();
    f(test.lattice(), &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use lattice_core::NodeId;

    /// Name of the `i`-th record in a populated lattice.
    pub fn record_name(i: usize) -> String {
        format!("N:{:04}:{i:06}", i % 1000)
    }

    /// Adds `count` records named by [`record_name`] and returns their ids.
    pub fn populate(lattice: &Lattice, count: usize) -> Vec<NodeId> {
        (0..count)
            .map(|i| {
                lattice
                    .add_node(&record_name(i), format!("value-{i}").as_bytes(), NodeKind::Primitive)
                    .expect("Failed to add node")
            })
            .collect()
    }

    /// A file lattice with `count` records.
    pub fn populated_lattice(count: usize) -> TestLattice {
        let test = TestLattice::file_with(Config::default().max_nodes(count as u64 + 1000));
        populate(test.lattice(), count);
        test
    }

    /// Adds the three records used by prefix isolation checks.
    pub fn prefix_fixture(lattice: &Lattice) {
        for (name, value) in [("P:a:1", "a1"), ("P:a:2", "a2"), ("P:b:1", "b1")] {
            lattice
                .add_node(name, value.as_bytes(), NodeKind::Pattern)
                .expect("Failed to add node");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_lattice() {
        let test = TestLattice::memory();
        assert!(test.path().is_none());
        assert_eq!(test.node_count(), 0);
    }

    #[test]
    fn test_with_temp_lattice() {
        let id = with_temp_lattice(|lattice| lattice.add_node("k", b"v", NodeKind::Primitive).unwrap());
        assert_eq!(id.as_u64(), 1);
    }

    #[test]
    fn test_reopen_keeps_flushed_records() {
        let mut test = TestLattice::file();
        scenarios::populate(test.lattice(), 3);
        test.flush().unwrap();
        test.reopen();
        assert_eq!(test.node_count(), 3);
    }

    #[test]
    fn test_issuer_keys_resolve() {
        let test = TestLattice::licensed(Tier::Tier1M, Config::default());
        assert_eq!(test.tier(), Tier::Tier1M);
    }

    #[test]
    fn test_product_verifier_rejects_issuer_keys() {
        let key = TestIssuer::new().key(Tier::Unlimited);
        let resolution = LicenseVerifier::product()
            .unwrap()
            .resolve(Some(&key), lattice_core::unix_now());
        assert_eq!(resolution.tier, Tier::Free);
        assert!(resolution.rejection.is_some());
    }
}
