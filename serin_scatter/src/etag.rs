//! Result fingerprint combination.
use serin_topology::ShardNumber;

/// Order-dependent 64-bit hash combine: `(rotl(acc, 5) + acc) ^ value`.
pub fn combine_hash(acc: u64, value: u64) -> u64 {
    acc.rotate_left(5).wrapping_add(acc) ^ value
}

/// Fold per-shard etags in ascending shard order, so the fingerprint does not
/// depend on the order responses arrived in.
pub fn combine_etags(etags: impl IntoIterator<Item = (ShardNumber, u64)>) -> u64 {
    let mut etags: Vec<_> = etags.into_iter().collect();
    etags.sort_unstable_by_key(|&(shard, _)| shard);
    etags.into_iter().fold(0, |acc, (_, etag)| combine_hash(acc, etag))
}
