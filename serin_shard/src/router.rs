//! Bucket router: key → bucket → owning shard, consulting active migrations
//! before the range table.
use std::sync::Arc;

use tracing::debug;

use serin_topology::{
    Bucket, BucketMigration, MigrationStatus, MigrationWritePolicy, ShardNumber, ShardingConfig, Topology, TopologyError, TopologyStore,
};

use crate::bucket::{bucket_for, RoutingError};

/// Where a write for one bucket must be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteRoute {
    /// Write to a single shard.
    Single(ShardNumber),
    /// Write to both shards; `primary` acknowledges first.
    Dual {
        /// Shard currently owning the data.
        primary: ShardNumber,
        /// Shard receiving the data.
        secondary: ShardNumber,
    },
    /// Writes are rejected until the migration finishes.
    Blocked(BucketMigration),
}

/// Routing decision for one key, taken against a single snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteDecision {
    /// Bucket of the key.
    pub bucket: Bucket,
    /// Shard serving reads.
    pub read_shard: ShardNumber,
    /// Shard(s) receiving writes.
    pub write: WriteRoute,
    /// Migration affecting the bucket, if any.
    pub migration: Option<BucketMigration>,
    /// Version of the snapshot the decision was made with.
    pub topology_version: u64,
}

impl RouteDecision {
    /// Shards a write must reach, or an error when writes are blocked.
    pub fn write_targets(&self) -> Result<Vec<ShardNumber>, RoutingError> {
        match self.write {
            WriteRoute::Single(shard) => Ok(vec![shard]),
            WriteRoute::Dual { primary, secondary } => Ok(vec![primary, secondary]),
            WriteRoute::Blocked(m) => Err(RoutingError::BucketMigrating {
                bucket: m.bucket,
                source_shard: m.source_shard,
                destination_shard: m.destination_shard,
            }),
        }
    }
}

/// Routes keys against the store's current snapshot.
pub struct BucketRouter {
    store: Arc<TopologyStore>,
    separator: char,
    write_policy: MigrationWritePolicy,
}

impl BucketRouter {
    /// Router over `store`; the configured bucket space must match the
    /// published topology's.
    pub fn new(store: Arc<TopologyStore>, config: &ShardingConfig) -> Result<Self, TopologyError> {
        let space = store.snapshot().bucket_space();
        if space != config.bucket_space {
            return Err(TopologyError::BucketSpaceMismatch { expected: config.bucket_space, found: space });
        }
        Ok(Self { store, separator: config.separator, write_policy: config.migration_write_policy })
    }

    pub fn store(&self) -> &Arc<TopologyStore> {
        &self.store
    }

    /// Bucket of `key` in `topology`'s bucket space.
    pub fn bucket(&self, topology: &Topology, key: &str) -> Result<Bucket, RoutingError> {
        bucket_for(key, self.separator, topology.bucket_space())
    }

    /// Shard serving reads for `key`.
    pub fn route(&self, key: &str) -> Result<ShardNumber, RoutingError> {
        Ok(self.decide(key)?.read_shard)
    }

    /// Shards a write for `key` must reach.
    pub fn route_for_write(&self, key: &str) -> Result<Vec<ShardNumber>, RoutingError> {
        self.decide(key)?.write_targets()
    }

    /// Full routing decision for `key` against the current snapshot.
    pub fn decide(&self, key: &str) -> Result<RouteDecision, RoutingError> {
        let topology = self.store.snapshot();
        self.decide_with(&topology, key)
    }

    /// Routing decision for `key` against an explicit snapshot, for callers
    /// that route several keys within one logical operation.
    pub fn decide_with(&self, topology: &Topology, key: &str) -> Result<RouteDecision, RoutingError> {
        let bucket = self.bucket(topology, key)?;
        self.decide_bucket(topology, bucket)
    }

    /// Routing decision for a bucket.
    pub fn decide_bucket(&self, topology: &Topology, bucket: Bucket) -> Result<RouteDecision, RoutingError> {
        if bucket >= topology.bucket_space() {
            return Err(RoutingError::BucketOutOfSpace { bucket, space: topology.bucket_space() });
        }
        serin_metrics::ROUTE_REQUESTS_TOTAL.inc();
        let migration = topology.migration_for(bucket).copied();
        let (read_shard, write) = match migration {
            None => {
                let owner = topology.range_owner(bucket);
                (owner, WriteRoute::Single(owner))
            }
            Some(m) if m.status == MigrationStatus::Done => (m.destination_shard, WriteRoute::Single(m.destination_shard)),
            Some(m) => {
                debug!(bucket, source = m.source_shard, destination = m.destination_shard, policy = ?self.write_policy, "routing migrating bucket");
                let write = match self.write_policy {
                    MigrationWritePolicy::Source => WriteRoute::Single(m.source_shard),
                    MigrationWritePolicy::DualWrite => WriteRoute::Dual { primary: m.source_shard, secondary: m.destination_shard },
                    MigrationWritePolicy::Redirect => WriteRoute::Single(m.destination_shard),
                    MigrationWritePolicy::Block => WriteRoute::Blocked(m),
                };
                (m.source_shard, write)
            }
        };
        Ok(RouteDecision { bucket, read_shard, write, migration, topology_version: topology.version() })
    }

    /// Shard serving reads for `bucket`.
    pub fn read_shard_for_bucket(&self, topology: &Topology, bucket: Bucket) -> Result<ShardNumber, RoutingError> {
        Ok(self.decide_bucket(topology, bucket)?.read_shard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serin_topology::BucketRange;

    fn router(policy: MigrationWritePolicy) -> BucketRouter {
        let topology = Topology::new(1, 1024, [0, 1], vec![BucketRange::new(0, 0), BucketRange::new(512, 1)], []).unwrap();
        let config = ShardingConfig { bucket_space: 1024, migration_write_policy: policy, ..ShardingConfig::default() };
        BucketRouter::new(Arc::new(TopologyStore::new(topology)), &config).unwrap()
    }

    fn key_in_bucket(router: &BucketRouter, wanted: impl Fn(Bucket) -> bool) -> (String, Bucket) {
        let topology = router.store().snapshot();
        (0..)
            .map(|i| format!("users/{i}"))
            .find_map(|k| {
                let b = router.bucket(&topology, &k).unwrap();
                wanted(b).then_some((k, b))
            })
            .unwrap()
    }

    #[test]
    fn routes_by_range_table() {
        let r = router(MigrationWritePolicy::Source);
        let t = r.store().snapshot();
        assert_eq!(r.read_shard_for_bucket(&t, 700).unwrap(), 1);
        assert_eq!(r.read_shard_for_bucket(&t, 10).unwrap(), 0);
        assert!(matches!(r.read_shard_for_bucket(&t, 1024), Err(RoutingError::BucketOutOfSpace { bucket: 1024, .. })));

        let (key, _) = key_in_bucket(&r, |b| b >= 512);
        assert_eq!(r.route(&key).unwrap(), 1);
        assert_eq!(r.route(&key.to_uppercase()).unwrap(), 1);
    }

    #[test]
    fn migrating_bucket_reads_from_source_until_done() {
        let r = router(MigrationWritePolicy::Source);
        let (key, bucket) = key_in_bucket(&r, |b| b < 512);
        r.store().begin_migration(bucket, 1).unwrap();

        let d = r.decide(&key).unwrap();
        assert_eq!(d.read_shard, 0);
        assert_eq!(d.write, WriteRoute::Single(0));
        assert!(d.migration.is_some());

        r.store().complete_migration(bucket).unwrap();
        let d = r.decide(&key).unwrap();
        assert_eq!(d.read_shard, 1);
        assert_eq!(d.migration, None);
        assert_eq!(d.topology_version, 3);
    }

    #[test]
    fn write_policy_controls_targets() {
        for (policy, expected) in [
            (MigrationWritePolicy::Source, Ok(vec![0])),
            (MigrationWritePolicy::DualWrite, Ok(vec![0, 1])),
            (MigrationWritePolicy::Redirect, Ok(vec![1])),
        ] {
            let r = router(policy);
            let (key, bucket) = key_in_bucket(&r, |b| b < 512);
            r.store().begin_migration(bucket, 1).unwrap();
            assert_eq!(r.route_for_write(&key), expected, "{policy:?}");
            assert_eq!(r.route(&key).unwrap(), 0);
        }

        let r = router(MigrationWritePolicy::Block);
        let (key, bucket) = key_in_bucket(&r, |b| b < 512);
        r.store().begin_migration(bucket, 1).unwrap();
        assert!(matches!(r.route_for_write(&key), Err(RoutingError::BucketMigrating { source_shard: 0, destination_shard: 1, .. })));
    }

    #[test]
    fn done_record_routes_to_destination() {
        let migration = BucketMigration { bucket: 5, source_shard: 0, destination_shard: 1, status: MigrationStatus::Done };
        let t = Topology::new(2, 1024, [0, 1], vec![BucketRange::new(0, 0), BucketRange::new(512, 1)], [migration]).unwrap();
        let r = router(MigrationWritePolicy::Source);
        let d = r.decide_bucket(&t, 5).unwrap();
        assert_eq!((d.read_shard, d.write), (1, WriteRoute::Single(1)));
    }

    #[test]
    fn decisions_use_the_snapshot_they_started_with() {
        let r = router(MigrationWritePolicy::Source);
        let held = r.store().snapshot();
        r.store().begin_migration(10, 1).unwrap();
        r.store().complete_migration(10).unwrap();
        assert_eq!(r.read_shard_for_bucket(&held, 10).unwrap(), 0);
        assert_eq!(r.read_shard_for_bucket(&r.store().snapshot(), 10).unwrap(), 1);
    }

    #[tokio::test]
    async fn shard_router_trait_matches_route() {
        use crate::ShardRouter;
        let r = router(MigrationWritePolicy::Source);
        for i in 0..32 {
            let key = format!("orders/{i}");
            assert_eq!(r.shard_for_key(&key).await.unwrap(), r.route(&key).unwrap());
        }
    }

    #[test]
    fn routing_is_deterministic_across_routers() {
        use rand::distributions::Alphanumeric;
        use rand::Rng;
        let a = router(MigrationWritePolicy::Source);
        let b = router(MigrationWritePolicy::Block);
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let key: String = (&mut rng).sample_iter(&Alphanumeric).take(12).map(char::from).collect();
            assert_eq!(a.route(&key).unwrap(), b.route(&key.to_lowercase()).unwrap());
        }
    }

    #[test]
    fn configured_bucket_space_must_match_topology() {
        let topology = Topology::new(1, 1024, [0], vec![BucketRange::new(0, 0)], []).unwrap();
        let store = Arc::new(TopologyStore::new(topology));
        let err = BucketRouter::new(store.clone(), &ShardingConfig::default()).err().unwrap();
        assert!(matches!(err, TopologyError::BucketSpaceMismatch { expected, found: 1024 } if expected == 1 << 20));

        let config = ShardingConfig { bucket_space: 1024, ..ShardingConfig::default() };
        let router = BucketRouter::new(store, &config).unwrap();
        for key in ["users/1", "orders/7$users/1", "Companies/42"] {
            let decided = router.decide(key).unwrap().bucket;
            assert_eq!(decided, bucket_for(key, config.separator, config.bucket_space).unwrap());
        }
    }
}
