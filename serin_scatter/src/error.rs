use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;

use serin_shard::RoutingError;
use serin_topology::{ShardNumber, TopologyError};

/// Failure of a single shard command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShardError {
    /// The shard did not answer before the operation timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The shard could not be reached.
    #[error("unreachable: {0}")]
    Unreachable(String),
    /// The shard executed the command and reported an error.
    #[error("shard error: {0}")]
    Remote(String),
    /// The command was cancelled.
    #[error("cancelled")]
    Cancelled,
    /// The task running the command failed.
    #[error("task failed: {0}")]
    TaskFailed(String),
}

/// Failure of a whole scatter-gather dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The caller cancelled the operation.
    #[error("scatter-gather cancelled")]
    Cancelled,
    /// The target shard set was empty.
    #[error("no target shards")]
    NoTargets,
    /// At least one shard command failed; no partial result is produced.
    #[error("{} of {total} shard commands failed", .failures.len())]
    ShardsFailed {
        /// Number of shards the command was sent to.
        total: usize,
        /// Failure per failed shard.
        failures: BTreeMap<ShardNumber, ShardError>,
    },
}

/// Failure of a sharded query operation.
#[derive(Debug, Error)]
pub enum ScatterError {
    /// A bucket in the query scope could not be routed.
    #[error(transparent)]
    Routing(#[from] RoutingError),
    /// The query scope does not match the topology.
    #[error(transparent)]
    Topology(#[from] TopologyError),
    /// Dispatching to the shards failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}
