//! Store configuration.

/// Default number of records kept by the record cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Default number of migrated records written back per batch during a scan.
pub const DEFAULT_SCAN_SYNC_BATCH: usize = 100;

/// How a serialized store derives the version token of a written record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VersionStrategy {
    /// The identity of the unit of work that wrote the record.
    #[default]
    UnitOfWorkId,
    /// SHA-256 of the encoded record, as lowercase hex.
    ContentHash,
}

/// Configuration of a serialized entity store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Number of encoded records to cache (0 disables the cache).
    pub cache_capacity: usize,

    /// Version token strategy.
    pub version_strategy: VersionStrategy,

    /// Migrated records written back per batch while scanning.
    pub scan_sync_batch: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            version_strategy: VersionStrategy::UnitOfWorkId,
            scan_sync_batch: DEFAULT_SCAN_SYNC_BATCH,
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache capacity.
    #[must_use]
    pub const fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Sets the version strategy.
    #[must_use]
    pub const fn version_strategy(mut self, strategy: VersionStrategy) -> Self {
        self.version_strategy = strategy;
        self
    }

    /// Sets the scan write-back batch size. Zero is treated as one.
    #[must_use]
    pub const fn scan_sync_batch(mut self, batch: usize) -> Self {
        self.scan_sync_batch = batch;
        self
    }
}
