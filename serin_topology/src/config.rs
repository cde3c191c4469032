//! Router configuration.
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TopologyError;
use crate::{DEFAULT_BUCKET_SPACE, DEFAULT_SEPARATOR};

/// Where writes to a bucket go while it is `Moving`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationWritePolicy {
    /// Keep writing to the source until ownership moves.
    #[default]
    Source,
    /// Write to both source and destination.
    DualWrite,
    /// Send writes to the destination.
    Redirect,
    /// Reject writes until the migration completes.
    Block,
}

/// Sharding settings shared by the router and the scatter-gather layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardingConfig {
    /// Number of buckets; must be a power of two.
    pub bucket_space: u32,
    /// Separator between a document id and its co-location anchor.
    pub separator: char,
    /// Timeout for a whole scatter-gather operation; absent waits indefinitely.
    pub orchestrator_timeout_secs: Option<u64>,
    /// Write routing while a bucket is migrating.
    pub migration_write_policy: MigrationWritePolicy,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            bucket_space: DEFAULT_BUCKET_SPACE,
            separator: DEFAULT_SEPARATOR,
            orchestrator_timeout_secs: None,
            migration_write_policy: MigrationWritePolicy::default(),
        }
    }
}

impl ShardingConfig {
    /// Load YAML configuration from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| TopologyError::Io { path: path.to_path_buf(), source })?;
        let config: ShardingConfig =
            serde_yaml::from_str(&content).map_err(|e| TopologyError::Parse { path: path.to_path_buf(), message: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), TopologyError> {
        if self.bucket_space == 0 || !self.bucket_space.is_power_of_two() {
            return Err(TopologyError::BucketSpaceNotPowerOfTwo(self.bucket_space));
        }
        Ok(())
    }

    /// Scatter-gather timeout, `None` when unbounded.
    pub fn orchestrator_timeout(&self) -> Option<Duration> {
        self.orchestrator_timeout_secs.map(Duration::from_secs)
    }
}
