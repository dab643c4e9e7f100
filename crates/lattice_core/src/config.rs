//! Lattice configuration.

/// Default physical capacity of a lattice.
pub const DEFAULT_MAX_NODES: u64 = 1_000_000;

/// Default number of buffered WAL bytes before an implicit write-out.
pub const DEFAULT_WAL_BUFFER_LIMIT: usize = 64 * 1024;

/// Configuration for opening a lattice.
#[derive(Debug, Clone)]
pub struct Config {
    /// Physical arena capacity, chunk records included.
    pub max_nodes: u64,

    /// Whether the tier ceiling is enforced.
    ///
    /// Only a verified `Unlimited` key can open with this set to `false`.
    pub evaluation_mode: bool,

    /// Base64 license key, if any.
    pub license_key: Option<String>,

    /// Whether to create the lattice if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to sync the WAL after every write (safer but slower).
    pub sync_on_write: bool,

    /// Buffered WAL bytes that trigger a write-out to the OS.
    pub wal_buffer_limit: usize,

    /// WAL entries since the last checkpoint that trigger an automatic
    /// checkpoint (0 = never).
    pub auto_checkpoint_entries: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_nodes: DEFAULT_MAX_NODES,
            evaluation_mode: true,
            license_key: None,
            create_if_missing: true,
            sync_on_write: false,
            wal_buffer_limit: DEFAULT_WAL_BUFFER_LIMIT,
            auto_checkpoint_entries: 0,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the physical capacity.
    #[must_use]
    pub const fn max_nodes(mut self, value: u64) -> Self {
        self.max_nodes = value;
        self
    }

    /// Sets the requested evaluation mode.
    #[must_use]
    pub const fn evaluation_mode(mut self, value: bool) -> Self {
        self.evaluation_mode = value;
        self
    }

    /// Sets the license key.
    #[must_use]
    pub fn license_key(mut self, key: impl Into<String>) -> Self {
        self.license_key = Some(key.into());
        self
    }

    /// Sets whether to create the lattice if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync the WAL on every write.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the WAL buffer limit in bytes.
    #[must_use]
    pub const fn wal_buffer_limit(mut self, bytes: usize) -> Self {
        self.wal_buffer_limit = bytes;
        self
    }

    /// Sets the automatic checkpoint threshold.
    #[must_use]
    pub const fn auto_checkpoint_entries(mut self, entries: u64) -> Self {
        self.auto_checkpoint_entries = entries;
        self
    }
}
