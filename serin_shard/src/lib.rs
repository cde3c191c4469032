//! Sharding algorithms for SerinDB: key → bucket → shard routing that
//! honours in-flight bucket migrations.
use async_trait::async_trait;

mod bucket;
mod router;

pub use bucket::{anchor, bucket_for, RoutingError};
pub use router::{BucketRouter, RouteDecision, WriteRoute};
pub use serin_topology::{Bucket, ShardNumber};

#[async_trait]
pub trait ShardRouter: Send + Sync {
    async fn shard_for_key(&self, key: &str) -> Result<ShardNumber, RoutingError>;
}

#[async_trait]
impl ShardRouter for BucketRouter {
    async fn shard_for_key(&self, key: &str) -> Result<ShardNumber, RoutingError> {
        self.route(key)
    }
}
