use std::time::Duration;

use crate::error::{StateStoreError, StoreResult};

/// Configuration shared by every store constructed from one registry.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How many committed versions stay materializable after maintenance.
    /// Files and cache entries older than `latest - num_batches_to_retain`
    /// are pruned.
    pub num_batches_to_retain: u64,
    /// Length of the delta chain at the latest version that triggers a
    /// snapshot on the next maintenance tick.
    pub max_delta_chain_for_snapshots: u64,
    /// Period of the shared maintenance ticker.
    pub maintenance_interval: Duration,
    /// Whether frame payloads in delta and snapshot files are
    /// zstd-compressed.
    pub compress: bool,
    /// Compression level for zstd (when compression enabled).
    pub compression_level: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            num_batches_to_retain: 2,
            max_delta_chain_for_snapshots: 10,
            maintenance_interval: Duration::from_secs(10),
            compress: false,
            compression_level: 0,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_num_batches_to_retain(mut self, retain: u64) -> Self {
        self.num_batches_to_retain = retain;
        self
    }

    pub fn with_max_delta_chain_for_snapshots(mut self, chain: u64) -> Self {
        self.max_delta_chain_for_snapshots = chain;
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compress = enabled;
        self
    }

    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.num_batches_to_retain < 1 {
            return Err(StateStoreError::InvalidConfiguration {
                field: "num_batches_to_retain",
                min: 1,
                value: self.num_batches_to_retain,
            });
        }
        if self.max_delta_chain_for_snapshots < 1 {
            return Err(StateStoreError::InvalidConfiguration {
                field: "max_delta_chain_for_snapshots",
                min: 1,
                value: self.max_delta_chain_for_snapshots,
            });
        }
        Ok(())
    }
}
