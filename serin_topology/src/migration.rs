//! Bucket migration state machine.
//!
//! `NotMigrating -> Moving -> Done -> removed`. Completing a migration removes
//! the record and hands the bucket to the destination in the range table in
//! the same snapshot, so routing never observes a gap between the two.
use crate::error::TopologyError;
use crate::model::{BucketMigration, BucketRange};
use crate::snapshot::{merge_ranges, Topology};
use crate::{Bucket, ShardNumber};

impl Topology {
    /// Migration recorded for `bucket`, if any.
    pub fn migration_for(&self, bucket: Bucket) -> Option<&BucketMigration> {
        self.migration_map().get(&bucket)
    }

    /// Schedule a move of `bucket` from its current owner to `destination`.
    pub fn begin_migration(&self, bucket: Bucket, destination: ShardNumber) -> Result<Self, TopologyError> {
        if bucket >= self.bucket_space() {
            return Err(TopologyError::MigrationOutOfSpace { bucket, space: self.bucket_space() });
        }
        if self.migration_map().contains_key(&bucket) {
            return Err(TopologyError::MigrationExists(bucket));
        }
        let source = self.range_owner(bucket);
        let mut migrations = self.migration_map().clone();
        migrations.insert(bucket, BucketMigration::moving(bucket, source, destination));
        self.successor(self.shard_set().clone(), self.ranges().to_vec(), migrations)
    }

    /// Finish the move of `bucket`: drop the migration record and reassign the
    /// bucket to its destination shard.
    pub fn complete_migration(&self, bucket: Bucket) -> Result<Self, TopologyError> {
        let migration = *self.migration_for(bucket).ok_or(TopologyError::NoSuchMigration(bucket))?;
        let mut migrations = self.migration_map().clone();
        migrations.remove(&bucket);
        let ranges = self.reassign_bucket(bucket, migration.destination_shard);
        self.successor(self.shard_set().clone(), ranges, migrations)
    }

    /// Abandon a move that is still copying; the source keeps the bucket.
    pub fn cancel_migration(&self, bucket: Bucket) -> Result<Self, TopologyError> {
        match self.migration_for(bucket) {
            Some(m) if m.is_moving() => {
                let mut migrations = self.migration_map().clone();
                migrations.remove(&bucket);
                self.successor(self.shard_set().clone(), self.ranges().to_vec(), migrations)
            }
            _ => Err(TopologyError::NoSuchMigration(bucket)),
        }
    }

    fn reassign_bucket(&self, bucket: Bucket, shard: ShardNumber) -> Vec<BucketRange> {
        let idx = self.range_index(bucket);
        let current = self.ranges()[idx];
        let end = self.range_end(idx);

        let mut ranges = Vec::with_capacity(self.ranges().len() + 2);
        ranges.extend_from_slice(&self.ranges()[..idx]);
        if current.range_start < bucket {
            ranges.push(current);
        }
        ranges.push(BucketRange::new(bucket, shard));
        if bucket + 1 < end {
            ranges.push(BucketRange::new(bucket + 1, current.shard_number));
        }
        ranges.extend_from_slice(&self.ranges()[idx + 1..]);
        merge_ranges(&mut ranges);
        ranges
    }
}
