//! A sharded query from target selection to the combined answer.
use std::sync::Arc;

use tracing::debug;

use serin_shard::BucketRouter;

use crate::cancel::CancelToken;
use crate::combine::ResultCombiner;
use crate::command::{resolve_targets, IndexQuery, ShardScope};
use crate::dispatch::ShardCommandDispatcher;
use crate::error::ScatterError;
use crate::result::CombinedResult;

/// What a sharded query produced.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// Every shard answered; the combined result.
    Combined(CombinedResult),
    /// The combined etag equals the one the caller already holds.
    NotModified {
        /// The unchanged etag.
        etag: String,
    },
}

/// Runs queries across the shards of the router's current topology.
pub struct ShardedQueryOperation {
    router: Arc<BucketRouter>,
    dispatcher: ShardCommandDispatcher,
}

impl ShardedQueryOperation {
    /// Operation routing through `router` and fanning out through `dispatcher`.
    pub fn new(router: Arc<BucketRouter>, dispatcher: ShardCommandDispatcher) -> Self {
        Self { router, dispatcher }
    }

    /// Run `query` on the shards selected by `scope`.
    ///
    /// Targets are resolved against a single topology snapshot taken at the
    /// start, so a concurrent topology change does not split the operation.
    /// Combination happens only after every target shard succeeded.
    pub async fn execute(
        &self,
        query: IndexQuery,
        scope: &ShardScope,
        expected_etag: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<QueryOutcome, ScatterError> {
        let topology = self.router.store().snapshot();
        let targets = resolve_targets(&self.router, &topology, scope)?;
        debug!(version = topology.version(), targets = ?targets, query = %query.query, "executing sharded query");

        let combiner = ResultCombiner::new(query.include_kind);
        let results = self.dispatcher.dispatch(Arc::new(query), &targets, cancel).await?;
        let combined = combiner.combine(results);

        let etag = combined.etag();
        if expected_etag == Some(etag.as_str()) {
            debug!(%etag, "sharded query not modified");
            return Ok(QueryOutcome::NotModified { etag });
        }
        Ok(QueryOutcome::Combined(combined))
    }
}
