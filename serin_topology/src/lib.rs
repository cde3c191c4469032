//! Versioned shard topology for SerinDB: bucket ranges, bucket migrations and
//! the atomically replaced snapshot every routing decision reads from.
#![deny(missing_docs)]

mod change;
mod config;
mod error;
mod migration;
mod model;
mod snapshot;
mod source;
mod store;

pub use change::TopologyChange;
pub use config::{MigrationWritePolicy, ShardingConfig};
pub use error::TopologyError;
pub use model::{BucketMigration, BucketRange, MigrationStatus};
pub use snapshot::Topology;
pub use source::{refresh_once, spawn_refresh, FileTopologySource, StaticTopologySource, TopologySource};
pub use store::TopologyStore;

/// Hash partition of the key space, in `[0, bucket_space)`.
pub type Bucket = u32;

/// Identifier of an independently replicated data shard.
pub type ShardNumber = u32;

/// Default size of the bucket space (2^20).
pub const DEFAULT_BUCKET_SPACE: u32 = 1 << 20;

/// Default separator between a document id and its co-location anchor.
pub const DEFAULT_SEPARATOR: char = '$';
