//! Queries, per-shard commands and target selection.
use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use serin_shard::BucketRouter;
use serin_topology::{Bucket, ShardNumber, Topology, TopologyError};

use crate::cancel::CancelToken;
use crate::error::ScatterError;
use crate::result::IncludeKind;

/// A query as submitted by the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexQuery {
    /// Query text, executed as-is by each shard.
    pub query: String,
    /// Named query parameters.
    #[serde(default)]
    pub parameters: Value,
    /// Shape of included documents in the combined result.
    #[serde(default)]
    pub include_kind: IncludeKind,
}

impl IndexQuery {
    /// Query without parameters.
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), ..Self::default() }
    }
}

/// "Run this query on shard N"; lives only for one scatter-gather operation.
#[derive(Debug, Clone)]
pub struct ShardQueryCommand {
    /// Target shard.
    pub shard_number: ShardNumber,
    /// Query shared by every command of the operation.
    pub query: Arc<IndexQuery>,
    /// Cancellation of the whole operation; transports may watch it to stop
    /// remote work early.
    pub cancel: CancelToken,
}

/// Which shards a query must reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardScope {
    /// Every shard of the topology.
    All,
    /// Shards serving reads for these buckets.
    Buckets(Vec<Bucket>),
    /// An explicit shard set.
    Shards(Vec<ShardNumber>),
}

/// Target shards of `scope` under `topology`.
pub fn resolve_targets(router: &BucketRouter, topology: &Topology, scope: &ShardScope) -> Result<BTreeSet<ShardNumber>, ScatterError> {
    match scope {
        ShardScope::All => Ok(topology.all_shards().collect()),
        ShardScope::Buckets(buckets) => buckets
            .iter()
            .map(|&b| router.read_shard_for_bucket(topology, b).map_err(ScatterError::from))
            .collect(),
        ShardScope::Shards(shards) => shards
            .iter()
            .map(|&s| if topology.contains_shard(s) { Ok(s) } else { Err(TopologyError::UnknownShard(s).into()) })
            .collect(),
    }
}
