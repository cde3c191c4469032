use serde::{Deserialize, Serialize};

use crate::{Bucket, ShardNumber};

/// Start of a contiguous run of buckets owned by one shard.
///
/// A range extends up to the next range's start, or to the end of the bucket
/// space for the last range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRange {
    /// First bucket of the range (inclusive).
    pub range_start: Bucket,
    /// Shard owning every bucket of the range.
    pub shard_number: ShardNumber,
}

impl BucketRange {
    /// Create a range starting at `range_start` owned by `shard_number`.
    pub const fn new(range_start: Bucket, shard_number: ShardNumber) -> Self {
        Self { range_start, shard_number }
    }
}

/// Progress of a single bucket move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Data is being copied; the source still owns the bucket.
    Moving,
    /// Data has been copied; ownership belongs to the destination.
    Done,
}

/// A bucket in transit between two shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketMigration {
    /// Bucket being moved.
    pub bucket: Bucket,
    /// Shard the bucket is leaving.
    pub source_shard: ShardNumber,
    /// Shard the bucket is moving to.
    pub destination_shard: ShardNumber,
    /// Current state of the move.
    pub status: MigrationStatus,
}

impl BucketMigration {
    /// A freshly scheduled move.
    pub const fn moving(bucket: Bucket, source_shard: ShardNumber, destination_shard: ShardNumber) -> Self {
        Self { bucket, source_shard, destination_shard, status: MigrationStatus::Moving }
    }

    /// Shard that must serve reads for the bucket.
    pub const fn read_shard(&self) -> ShardNumber {
        match self.status {
            MigrationStatus::Moving => self.source_shard,
            MigrationStatus::Done => self.destination_shard,
        }
    }

    /// Whether the move is still copying data.
    pub const fn is_moving(&self) -> bool {
        matches!(self.status, MigrationStatus::Moving)
    }
}
