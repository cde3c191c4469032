//! Key normalization and bucket hashing.
//!
//! The hash (XXHash64, seed 0) and the modulus are part of the on-disk
//! contract: changing either relocates every document.
use thiserror::Error;
use xxhash_rust::xxh64::xxh64;

use serin_topology::{Bucket, ShardNumber};

/// Errors from routing a key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// The key has nothing to hash after normalization.
    #[error("key {0:?} has an empty routing anchor")]
    EmptyKey(String),
    /// A bucket outside the topology's bucket space was routed.
    #[error("bucket {bucket} outside bucket space {space}")]
    BucketOutOfSpace {
        /// Offending bucket.
        bucket: Bucket,
        /// Bucket space of the snapshot.
        space: u32,
    },
    /// Writes to the bucket are blocked while it migrates.
    #[error("bucket {bucket} is migrating from shard {source_shard} to shard {destination_shard}")]
    BucketMigrating {
        /// Migrating bucket.
        bucket: Bucket,
        /// Shard the bucket is leaving.
        source_shard: ShardNumber,
        /// Shard the bucket is moving to.
        destination_shard: ShardNumber,
    },
}

/// Lower-cased routing anchor of `key`.
///
/// When the key contains `separator` past its first character, only the text
/// after the last occurrence is hashed, so `orders/1$users/1` lands in the
/// same bucket as `users/1`.
pub fn anchor(key: &str, separator: char) -> String {
    let lower = key.to_lowercase();
    match lower.rfind(separator) {
        Some(pos) if pos > 0 => lower[pos + separator.len_utf8()..].to_string(),
        _ => lower,
    }
}

/// Bucket of `key` within a power-of-two `bucket_space`.
pub fn bucket_for(key: &str, separator: char, bucket_space: u32) -> Result<Bucket, RoutingError> {
    let anchor = anchor(key, separator);
    if anchor.is_empty() {
        return Err(RoutingError::EmptyKey(key.to_string()));
    }
    Ok((xxh64(anchor.as_bytes(), 0) % u64::from(bucket_space)) as Bucket)
}
