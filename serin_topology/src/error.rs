use std::path::PathBuf;

use thiserror::Error;

use crate::{Bucket, ShardNumber};

/// Errors raised while loading, validating or updating a topology.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// The range table is empty.
    #[error("topology has no bucket ranges")]
    NoRanges,
    /// The first range does not start at bucket 0.
    #[error("first bucket range starts at {0}, expected 0")]
    FirstRangeNotZero(Bucket),
    /// Range starts are not strictly ascending.
    #[error("bucket range starting at {next} follows range starting at {prev}")]
    RangesNotAscending {
        /// Start of the earlier range.
        prev: Bucket,
        /// Start of the offending range.
        next: Bucket,
    },
    /// A range starts outside the bucket space.
    #[error("bucket range start {start} outside bucket space {space}")]
    RangeOutOfSpace {
        /// Offending range start.
        start: Bucket,
        /// Configured bucket space.
        space: u32,
    },
    /// A range boundary already exists at this bucket.
    #[error("a bucket range already starts at {0}")]
    RangeExists(Bucket),
    /// The bucket space is zero or not a power of two.
    #[error("bucket space {0} is not a power of two")]
    BucketSpaceNotPowerOfTwo(u32),
    /// A topology's bucket space differs from the one keys are hashed with.
    #[error("bucket space {found} does not match expected bucket space {expected}")]
    BucketSpaceMismatch {
        /// Bucket space already in use.
        expected: u32,
        /// Bucket space offered.
        found: u32,
    },
    /// A range or migration names a shard outside the shard set.
    #[error("shard {0} is not part of the topology")]
    UnknownShard(ShardNumber),
    /// A migration names a bucket outside the bucket space.
    #[error("migration bucket {bucket} outside bucket space {space}")]
    MigrationOutOfSpace {
        /// Offending bucket.
        bucket: Bucket,
        /// Configured bucket space.
        space: u32,
    },
    /// A moving bucket's source shard does not own it in the range table.
    #[error("bucket {bucket} migrates from shard {source_shard} but is owned by shard {owner}")]
    MigrationSourceMismatch {
        /// Migrating bucket.
        bucket: Bucket,
        /// Declared source shard.
        source_shard: ShardNumber,
        /// Owner according to the range table.
        owner: ShardNumber,
    },
    /// A migration for the bucket is already in progress.
    #[error("bucket {0} is already migrating")]
    MigrationExists(Bucket),
    /// No migration is recorded for the bucket.
    #[error("bucket {0} has no migration in progress")]
    NoSuchMigration(Bucket),
    /// Source and destination shard are the same.
    #[error("bucket {bucket} cannot migrate to its own shard {shard}")]
    SelfMigration {
        /// Migrating bucket.
        bucket: Bucket,
        /// Shard named as both source and destination.
        shard: ShardNumber,
    },
    /// A published snapshot must carry a strictly newer version.
    #[error("topology version {offered} is not newer than current version {current}")]
    StaleVersion {
        /// Version currently published.
        current: u64,
        /// Version that was offered.
        offered: u64,
    },
    /// Reading a topology or configuration file failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// A topology or configuration document could not be parsed.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// File that could not be parsed.
        path: PathBuf,
        /// Parser message.
        message: String,
    },
}
