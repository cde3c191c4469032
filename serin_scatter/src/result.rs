//! Per-shard and combined query results.
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use serin_topology::ShardNumber;

/// Result of running a query on one shard, as produced by the shard's executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Index the query ran against.
    pub index_name: String,
    /// Include paths requested by the query.
    pub included_paths: Option<Vec<String>>,
    /// Matches on this shard.
    pub total_results: u64,
    /// Matches skipped on this shard (e.g. duplicates).
    pub skipped_results: u64,
    /// Whether the shard's index was behind its documents.
    pub is_stale: bool,
    /// Last time the shard's index was updated.
    pub index_timestamp: DateTime<Utc>,
    /// Last time the shard's index was queried.
    pub last_query_time: DateTime<Utc>,
    /// Cluster command index the shard had applied, when known.
    pub raft_command_index: Option<u64>,
    /// Fingerprint of this shard's result set.
    pub result_etag: u64,
    /// Result rows.
    pub results: Vec<Value>,
    /// Included documents by id; `None` when the id was referenced but not
    /// found on this shard.
    pub includes: BTreeMap<String, Option<Value>>,
}

/// Shape in which the caller wants included documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncludeKind {
    /// Documents carrying their id.
    #[default]
    Document,
    /// Raw document bodies.
    Raw,
}

/// An included document in the caller's requested shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IncludePayload {
    /// Document with its id.
    Document {
        /// Document id.
        id: String,
        /// Document body.
        data: Value,
    },
    /// Raw body.
    Raw(Value),
}

impl IncludePayload {
    /// Wrap `data` for `kind`.
    pub fn new(kind: IncludeKind, id: &str, data: Value) -> Self {
        match kind {
            IncludeKind::Document => IncludePayload::Document { id: id.to_string(), data },
            IncludeKind::Raw => IncludePayload::Raw(data),
        }
    }

    /// Document body.
    pub fn data(&self) -> &Value {
        match self {
            IncludePayload::Document { data, .. } | IncludePayload::Raw(data) => data,
        }
    }
}

/// One client-visible answer assembled from every shard's result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CombinedResult {
    /// Index the query ran against (lowest shard's value).
    pub index_name: String,
    /// Include paths (lowest shard's value).
    pub included_paths: Option<Vec<String>>,
    /// Sum of per-shard matches.
    pub total_results: u64,
    /// Sum of per-shard skipped matches.
    pub skipped_results: u64,
    /// True when any shard was stale.
    pub is_stale: bool,
    /// Latest index update across shards.
    pub index_timestamp: DateTime<Utc>,
    /// Latest query time across shards.
    pub last_query_time: DateTime<Utc>,
    /// Highest cluster command index reported.
    pub raft_command_index: Option<u64>,
    /// Fingerprint over every shard's etag.
    pub result_etag: u64,
    /// Result rows concatenated in ascending shard order.
    pub results: Vec<Value>,
    /// Included documents by id.
    pub includes: BTreeMap<String, IncludePayload>,
    /// Ids referenced as includes that no shard could supply.
    pub missing_includes: BTreeSet<String>,
    /// Shards that contributed, ascending.
    pub shards: Vec<ShardNumber>,
}

impl CombinedResult {
    /// Etag as presented to clients.
    pub fn etag(&self) -> String {
        self.result_etag.to_string()
    }
}
