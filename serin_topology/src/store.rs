//! Atomically replaced topology snapshot.
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::error::TopologyError;
use crate::snapshot::Topology;
use crate::{Bucket, ShardNumber};

/// Holder of the currently published [`Topology`].
///
/// Readers take an `Arc` to the snapshot once per decision and keep using it;
/// writers build a whole new snapshot and swap it in under the write lock.
pub struct TopologyStore {
    current: RwLock<Arc<Topology>>,
}

impl TopologyStore {
    /// Create a store publishing `initial`.
    pub fn new(initial: Topology) -> Self {
        serin_metrics::TOPOLOGY_VERSION.set(initial.version() as i64);
        Self { current: RwLock::new(Arc::new(initial)) }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<Topology> {
        self.current.read().clone()
    }

    /// Version of the current snapshot.
    pub fn version(&self) -> u64 {
        self.current.read().version()
    }

    /// Replace the snapshot with a strictly newer one from the topology source.
    pub fn publish(&self, next: Topology) -> Result<Arc<Topology>, TopologyError> {
        self.update(|_| Ok(next))
    }

    /// Derive a new snapshot from the current one and publish it.
    ///
    /// `derive` runs under the write lock so concurrent updates cannot both
    /// build on the same predecessor.
    pub fn update<F>(&self, derive: F) -> Result<Arc<Topology>, TopologyError>
    where
        F: FnOnce(&Topology) -> Result<Topology, TopologyError>,
    {
        let mut guard = self.current.write();
        let next = derive(&guard)?;
        if next.version() <= guard.version() {
            return Err(TopologyError::StaleVersion { current: guard.version(), offered: next.version() });
        }
        if next.bucket_space() != guard.bucket_space() {
            return Err(TopologyError::BucketSpaceMismatch { expected: guard.bucket_space(), found: next.bucket_space() });
        }
        let next = Arc::new(next);
        info!(
            from = guard.version(),
            to = next.version(),
            shards = next.shard_count(),
            ranges = next.ranges().len(),
            migrations = next.migrations().count(),
            "publishing topology"
        );
        serin_metrics::TOPOLOGY_VERSION.set(next.version() as i64);
        *guard = next.clone();
        Ok(next)
    }

    /// See [`Topology::begin_migration`].
    pub fn begin_migration(&self, bucket: Bucket, destination: ShardNumber) -> Result<Arc<Topology>, TopologyError> {
        self.update(|t| t.begin_migration(bucket, destination))
    }

    /// See [`Topology::complete_migration`].
    pub fn complete_migration(&self, bucket: Bucket) -> Result<Arc<Topology>, TopologyError> {
        self.update(|t| t.complete_migration(bucket))
    }

    /// See [`Topology::cancel_migration`].
    pub fn cancel_migration(&self, bucket: Bucket) -> Result<Arc<Topology>, TopologyError> {
        self.update(|t| t.cancel_migration(bucket))
    }

    /// See [`Topology::split_range`].
    pub fn split_range(&self, at: Bucket, shard: ShardNumber) -> Result<Arc<Topology>, TopologyError> {
        self.update(|t| t.split_range(at, shard))
    }

    /// See [`Topology::merge_adjacent`].
    pub fn merge_adjacent(&self) -> Result<Arc<Topology>, TopologyError> {
        self.update(Topology::merge_adjacent)
    }

    /// See [`Topology::add_shard`].
    pub fn add_shard(&self, shard: ShardNumber) -> Result<Arc<Topology>, TopologyError> {
        self.update(|t| t.add_shard(shard))
    }
}
