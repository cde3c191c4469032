//! Immutable, validated topology snapshot.
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::TopologyError;
use crate::model::{BucketMigration, BucketRange};
use crate::{Bucket, ShardNumber, DEFAULT_BUCKET_SPACE};

/// Serialized form of a topology, validated on conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TopologyDocument {
    version: u64,
    #[serde(default = "default_bucket_space")]
    bucket_space: u32,
    #[serde(default)]
    shards: Vec<ShardNumber>,
    ranges: Vec<BucketRange>,
    #[serde(default)]
    migrations: Vec<BucketMigration>,
}

fn default_bucket_space() -> u32 {
    DEFAULT_BUCKET_SPACE
}

/// Shard layout at one version: shard set, range table and active migrations.
///
/// A `Topology` is validated on construction and never mutated afterwards;
/// every change produces a new snapshot with a higher version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TopologyDocument", into = "TopologyDocument")]
pub struct Topology {
    version: u64,
    bucket_space: u32,
    shards: BTreeSet<ShardNumber>,
    ranges: Vec<BucketRange>,
    migrations: BTreeMap<Bucket, BucketMigration>,
}

impl Topology {
    /// Build and validate a snapshot.
    ///
    /// Shards referenced by ranges are implicitly part of the shard set.
    pub fn new(
        version: u64,
        bucket_space: u32,
        shards: impl IntoIterator<Item = ShardNumber>,
        ranges: Vec<BucketRange>,
        migrations: impl IntoIterator<Item = BucketMigration>,
    ) -> Result<Self, TopologyError> {
        let mut shards: BTreeSet<ShardNumber> = shards.into_iter().collect();
        shards.extend(ranges.iter().map(|r| r.shard_number));
        let migrations = migrations.into_iter().map(|m| (m.bucket, m)).collect();
        let topology = Self { version, bucket_space, shards, ranges, migrations };
        topology.validate()?;
        Ok(topology)
    }

    /// Spread `shard_count` shards evenly over the bucket space.
    pub fn uniform(version: u64, bucket_space: u32, shard_count: u32) -> Result<Self, TopologyError> {
        if shard_count == 0 {
            return Err(TopologyError::NoRanges);
        }
        let width = (bucket_space / shard_count).max(1);
        let ranges = (0..shard_count.min(bucket_space))
            .map(|shard| BucketRange::new(shard * width, shard))
            .collect();
        Self::new(version, bucket_space, 0..shard_count, ranges, [])
    }

    /// Load a topology from a JSON or YAML (`.yaml`/`.yml`) file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| TopologyError::Io { path: path.to_path_buf(), source })?;
        Self::parse(path, &content)
    }

    pub(crate) fn parse(path: &Path, content: &str) -> Result<Self, TopologyError> {
        let yaml = matches!(path.extension().and_then(|e| e.to_str()), Some("yaml" | "yml"));
        let parsed = if yaml {
            serde_yaml::from_str(content).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(content).map_err(|e| e.to_string())
        };
        parsed.map_err(|message| TopologyError::Parse { path: path.to_path_buf(), message })
    }

    fn validate(&self) -> Result<(), TopologyError> {
        if self.bucket_space == 0 || !self.bucket_space.is_power_of_two() {
            return Err(TopologyError::BucketSpaceNotPowerOfTwo(self.bucket_space));
        }
        let first = self.ranges.first().ok_or(TopologyError::NoRanges)?;
        if first.range_start != 0 {
            return Err(TopologyError::FirstRangeNotZero(first.range_start));
        }
        for pair in self.ranges.windows(2) {
            if pair[1].range_start <= pair[0].range_start {
                return Err(TopologyError::RangesNotAscending { prev: pair[0].range_start, next: pair[1].range_start });
            }
        }
        if let Some(last) = self.ranges.last() {
            if last.range_start >= self.bucket_space {
                return Err(TopologyError::RangeOutOfSpace { start: last.range_start, space: self.bucket_space });
            }
        }
        for migration in self.migrations.values() {
            if migration.bucket >= self.bucket_space {
                return Err(TopologyError::MigrationOutOfSpace { bucket: migration.bucket, space: self.bucket_space });
            }
            if migration.source_shard == migration.destination_shard {
                return Err(TopologyError::SelfMigration { bucket: migration.bucket, shard: migration.source_shard });
            }
            for shard in [migration.source_shard, migration.destination_shard] {
                if !self.shards.contains(&shard) {
                    return Err(TopologyError::UnknownShard(shard));
                }
            }
            let owner = self.range_owner(migration.bucket);
            if migration.is_moving() && owner != migration.source_shard {
                return Err(TopologyError::MigrationSourceMismatch {
                    bucket: migration.bucket,
                    source_shard: migration.source_shard,
                    owner,
                });
            }
        }
        Ok(())
    }

    /// Monotonic version of this snapshot.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Size of the bucket space; buckets are in `[0, bucket_space)`.
    pub fn bucket_space(&self) -> u32 {
        self.bucket_space
    }

    /// Range table, sorted ascending by start.
    pub fn ranges(&self) -> &[BucketRange] {
        &self.ranges
    }

    /// Every shard of the topology, ascending.
    pub fn all_shards(&self) -> impl Iterator<Item = ShardNumber> + '_ {
        self.shards.iter().copied()
    }

    /// Number of shards, including shards without buckets.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Whether `shard` is part of the topology.
    pub fn contains_shard(&self, shard: ShardNumber) -> bool {
        self.shards.contains(&shard)
    }

    /// Whether `shard` owns at least one bucket range.
    pub fn shard_has_buckets(&self, shard: ShardNumber) -> bool {
        self.ranges.iter().any(|r| r.shard_number == shard)
    }

    /// Half-open `[start, end)` bucket intervals owned by `shard`.
    pub fn buckets_owned_by(&self, shard: ShardNumber) -> Vec<(Bucket, u32)> {
        self.ranges
            .iter()
            .enumerate()
            .filter(|(_, r)| r.shard_number == shard)
            .map(|(idx, r)| (r.range_start, self.range_end(idx)))
            .collect()
    }

    pub(crate) fn range_end(&self, idx: usize) -> u32 {
        self.ranges.get(idx + 1).map_or(self.bucket_space, |next| next.range_start)
    }

    /// Index of the range with the greatest start not exceeding `bucket`.
    ///
    /// Falls back to the last range when `bucket` precedes every start, which
    /// only a corrupted range table can produce.
    pub(crate) fn range_index(&self, bucket: Bucket) -> usize {
        let idx = self.ranges.partition_point(|r| r.range_start <= bucket);
        if idx == 0 {
            error!(bucket, version = self.version, "bucket precedes every range start; range table is corrupted");
            serin_metrics::ROUTE_CORRUPTION_TOTAL.inc();
            return self.ranges.len() - 1;
        }
        idx - 1
    }

    /// Shard owning `bucket` according to the range table alone.
    pub fn range_owner(&self, bucket: Bucket) -> ShardNumber {
        self.ranges[self.range_index(bucket)].shard_number
    }

    /// Active migrations, keyed by bucket.
    pub fn migrations(&self) -> impl Iterator<Item = &BucketMigration> {
        self.migrations.values()
    }

    pub(crate) fn migration_map(&self) -> &BTreeMap<Bucket, BucketMigration> {
        &self.migrations
    }

    pub(crate) fn shard_set(&self) -> &BTreeSet<ShardNumber> {
        &self.shards
    }

    /// Next snapshot built from this one with the version bumped.
    pub(crate) fn successor(
        &self,
        shards: BTreeSet<ShardNumber>,
        ranges: Vec<BucketRange>,
        migrations: BTreeMap<Bucket, BucketMigration>,
    ) -> Result<Self, TopologyError> {
        Self::new(self.version + 1, self.bucket_space, shards, ranges, migrations.into_values())
    }

    /// Insert a range boundary at `at`, handing `[at, next_start)` to `shard`.
    pub fn split_range(&self, at: Bucket, shard: ShardNumber) -> Result<Self, TopologyError> {
        if at >= self.bucket_space {
            return Err(TopologyError::RangeOutOfSpace { start: at, space: self.bucket_space });
        }
        if !self.shards.contains(&shard) {
            return Err(TopologyError::UnknownShard(shard));
        }
        let idx = self.ranges.partition_point(|r| r.range_start < at);
        if self.ranges.get(idx).map_or(false, |r| r.range_start == at) {
            return Err(TopologyError::RangeExists(at));
        }
        let mut ranges = self.ranges.clone();
        ranges.insert(idx, BucketRange::new(at, shard));
        self.successor(self.shards.clone(), ranges, self.migrations.clone())
    }

    /// Remove boundaries between neighbouring ranges owned by the same shard.
    pub fn merge_adjacent(&self) -> Result<Self, TopologyError> {
        let mut ranges = self.ranges.clone();
        merge_ranges(&mut ranges);
        self.successor(self.shards.clone(), ranges, self.migrations.clone())
    }

    /// Add a shard that owns no buckets yet.
    pub fn add_shard(&self, shard: ShardNumber) -> Result<Self, TopologyError> {
        let mut shards = self.shards.clone();
        shards.insert(shard);
        self.successor(shards, self.ranges.clone(), self.migrations.clone())
    }
}

pub(crate) fn merge_ranges(ranges: &mut Vec<BucketRange>) {
    ranges.dedup_by(|next, prev| next.shard_number == prev.shard_number);
}

impl TryFrom<TopologyDocument> for Topology {
    type Error = TopologyError;

    fn try_from(doc: TopologyDocument) -> Result<Self, Self::Error> {
        Topology::new(doc.version, doc.bucket_space, doc.shards, doc.ranges, doc.migrations)
    }
}

impl From<Topology> for TopologyDocument {
    fn from(t: Topology) -> Self {
        TopologyDocument {
            version: t.version,
            bucket_space: t.bucket_space,
            shards: t.shards.into_iter().collect(),
            ranges: t.ranges,
            migrations: t.migrations.into_values().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn two_shards() -> Topology {
        Topology::new(1, 1024, [0, 1], vec![BucketRange::new(0, 0), BucketRange::new(512, 1)], []).unwrap()
    }

    #[test]
    fn owner_uses_greatest_start_not_exceeding_bucket() {
        let t = two_shards();
        assert_eq!(t.range_owner(10), 0);
        assert_eq!(t.range_owner(511), 0);
        assert_eq!(t.range_owner(512), 1);
        assert_eq!(t.range_owner(700), 1);
        assert_eq!(t.range_owner(1023), 1);
    }

    #[test]
    fn rejects_malformed_range_tables() {
        assert!(matches!(Topology::new(1, 1024, [], vec![], []), Err(TopologyError::NoRanges)));
        assert!(matches!(
            Topology::new(1, 1024, [], vec![BucketRange::new(4, 0)], []),
            Err(TopologyError::FirstRangeNotZero(4))
        ));
        assert!(matches!(
            Topology::new(1, 1024, [], vec![BucketRange::new(0, 0), BucketRange::new(0, 1)], []),
            Err(TopologyError::RangesNotAscending { prev: 0, next: 0 })
        ));
        assert!(matches!(
            Topology::new(1, 1024, [], vec![BucketRange::new(0, 0), BucketRange::new(1024, 1)], []),
            Err(TopologyError::RangeOutOfSpace { start: 1024, .. })
        ));
        assert!(matches!(
            Topology::new(1, 1000, [], vec![BucketRange::new(0, 0)], []),
            Err(TopologyError::BucketSpaceNotPowerOfTwo(1000))
        ));
    }

    #[test]
    fn rejects_migration_from_non_owner() {
        let err = Topology::new(
            1,
            1024,
            [0, 1],
            vec![BucketRange::new(0, 0), BucketRange::new(512, 1)],
            [BucketMigration::moving(700, 0, 1)],
        )
        .unwrap_err();
        assert!(matches!(err, TopologyError::MigrationSourceMismatch { bucket: 700, source_shard: 0, owner: 1 }));
    }

    #[test]
    fn every_bucket_has_exactly_one_owner() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let space = 1u32 << rng.gen_range(4..12);
            let mut starts: Vec<u32> = (0..rng.gen_range(1..8)).map(|_| rng.gen_range(1..space)).collect();
            starts.push(0);
            starts.sort_unstable();
            starts.dedup();
            let ranges: Vec<_> = starts.iter().map(|&s| BucketRange::new(s, rng.gen_range(0..4))).collect();
            let t = Topology::new(1, space, [], ranges, []).unwrap();

            for bucket in 0..space {
                let holders: Vec<_> = (0..t.ranges().len())
                    .filter(|&idx| t.ranges()[idx].range_start <= bucket && bucket < t.range_end(idx))
                    .collect();
                assert_eq!(holders.len(), 1, "bucket {bucket} in {:?}", t.ranges());
                assert_eq!(t.range_owner(bucket), t.ranges()[holders[0]].shard_number);
            }
        }
    }

    #[test]
    fn uniform_covers_space() {
        let t = Topology::uniform(3, 1 << 20, 3).unwrap();
        assert_eq!(t.shard_count(), 3);
        assert_eq!(t.range_owner(0), 0);
        assert_eq!(t.range_owner((1 << 20) - 1), 2);
        assert_eq!(t.version(), 3);
    }

    #[test]
    fn split_and_merge_bump_version() {
        let t = two_shards().add_shard(2).unwrap();
        assert!(!t.shard_has_buckets(2));

        let split = t.split_range(768, 2).unwrap();
        assert_eq!(split.version(), t.version() + 1);
        assert_eq!(split.range_owner(800), 2);
        assert_eq!(split.buckets_owned_by(1), vec![(512, 768)]);
        assert!(matches!(split.split_range(768, 0), Err(TopologyError::RangeExists(768))));

        let same = split.split_range(900, 2).unwrap().merge_adjacent().unwrap();
        assert_eq!(same.buckets_owned_by(2), vec![(768, 1024)]);
        assert_eq!(same.ranges().len(), 3);
    }

    #[test]
    fn json_and_yaml_documents_are_validated() {
        let json = r#"{"version":4,"bucket_space":1024,"ranges":[{"range_start":0,"shard_number":0},{"range_start":512,"shard_number":1}],
            "migrations":[{"bucket":3,"source_shard":0,"destination_shard":1,"status":"moving"}]}"#;
        let t = Topology::parse(Path::new("t.json"), json).unwrap();
        assert_eq!(t.version(), 4);
        assert_eq!(t.migrations().count(), 1);

        let yaml = "version: 2\nranges:\n  - range_start: 5\n    shard_number: 0\n";
        assert!(matches!(Topology::parse(Path::new("t.yaml"), yaml), Err(TopologyError::Parse { .. })));

        let back: Topology = serde_json::from_str(&serde_json::to_string(&t).unwrap()).unwrap();
        assert_eq!(back, t);
    }
}
