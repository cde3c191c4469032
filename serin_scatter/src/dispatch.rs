//! Concurrent fan-out of one query to a set of shards.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use serin_metrics::{SCATTER_CANCELLED_TOTAL, SCATTER_FAILURES_TOTAL, SCATTER_REQUESTS_TOTAL, SHARD_COMMAND_LATENCY_SECS};
use serin_topology::{ShardNumber, ShardingConfig};

use crate::cancel::CancelToken;
use crate::command::{IndexQuery, ShardQueryCommand};
use crate::error::{DispatchError, ShardError};
use crate::result::QueryResult;
use crate::transport::ShardTransport;

/// Outcome of every shard a query was sent to.
pub type ShardResponses = BTreeMap<ShardNumber, Result<QueryResult, ShardError>>;

/// Sends one query to many shards at once and waits for all of them.
///
/// Each shard gets its own task. The dispatcher waits until every task has
/// finished, the configured timeout elapses, or the caller cancels; shards
/// still outstanding at the timeout are recorded as [`ShardError::Timeout`].
/// The dispatcher never retries.
pub struct ShardCommandDispatcher {
    transport: Arc<dyn ShardTransport>,
    timeout: Option<Duration>,
}

impl ShardCommandDispatcher {
    /// Dispatcher over `transport`; `None` waits indefinitely.
    pub fn new(transport: Arc<dyn ShardTransport>, timeout: Option<Duration>) -> Self {
        Self { transport, timeout }
    }

    /// Dispatcher using the configured orchestrator timeout.
    pub fn from_config(transport: Arc<dyn ShardTransport>, config: &ShardingConfig) -> Self {
        Self::new(transport, config.orchestrator_timeout())
    }

    /// Configured timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Send `query` to every shard in `shards` and gather each shard's
    /// success or failure.
    ///
    /// Fails only with [`DispatchError::NoTargets`] or
    /// [`DispatchError::Cancelled`]; per-shard failures are in the map.
    pub async fn collect(&self, query: Arc<IndexQuery>, shards: &BTreeSet<ShardNumber>, cancel: &CancelToken) -> Result<ShardResponses, DispatchError> {
        if shards.is_empty() {
            return Err(DispatchError::NoTargets);
        }
        if cancel.is_cancelled() {
            SCATTER_CANCELLED_TOTAL.inc();
            return Err(DispatchError::Cancelled);
        }
        SCATTER_REQUESTS_TOTAL.inc();
        debug!(shards = ?shards, timeout = ?self.timeout, "dispatching shard commands");

        let mut tasks = JoinSet::new();
        for &shard in shards {
            let transport = Arc::clone(&self.transport);
            let command = ShardQueryCommand { shard_number: shard, query: Arc::clone(&query), cancel: cancel.clone() };
            let mut token = cancel.clone();
            tasks.spawn(async move {
                let started = Instant::now();
                let outcome = tokio::select! {
                    res = transport.execute(command) => res,
                    _ = token.cancelled() => Err(ShardError::Cancelled),
                };
                SHARD_COMMAND_LATENCY_SECS.observe(started.elapsed().as_secs_f64());
                (shard, outcome)
            });
        }

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut token = cancel.clone();
        let mut responses = ShardResponses::new();
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tasks.abort_all();
                    SCATTER_CANCELLED_TOTAL.inc();
                    warn!(answered = responses.len(), total = shards.len(), "scatter-gather cancelled");
                    return Err(DispatchError::Cancelled);
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((shard, outcome))) => {
                        if let Err(e) = &outcome {
                            debug!(shard, error = %e, "shard command failed");
                        }
                        responses.insert(shard, outcome);
                    }
                    Some(Err(e)) => error!(error = %e, "shard command task failed"),
                },
                _ = elapsed(deadline) => {
                    tasks.abort_all();
                    let waited = self.timeout.unwrap_or_default();
                    for &shard in shards {
                        responses.entry(shard).or_insert_with(|| {
                            warn!(shard, ?waited, "shard command timed out");
                            Err(ShardError::Timeout(waited))
                        });
                    }
                    break;
                }
            }
        }
        for &shard in shards {
            responses.entry(shard).or_insert_with(|| Err(ShardError::TaskFailed(format!("task for shard {shard} did not report"))));
        }
        Ok(responses)
    }

    /// Send `query` to every shard in `shards`; succeeds only if every
    /// shard succeeded.
    pub async fn dispatch(&self, query: Arc<IndexQuery>, shards: &BTreeSet<ShardNumber>, cancel: &CancelToken) -> Result<BTreeMap<ShardNumber, QueryResult>, DispatchError> {
        let responses = self.collect(query, shards, cancel).await?;
        let total = responses.len();
        let mut results = BTreeMap::new();
        let mut failures = BTreeMap::new();
        for (shard, outcome) in responses {
            match outcome {
                Ok(result) => {
                    results.insert(shard, result);
                }
                Err(e) => {
                    failures.insert(shard, e);
                }
            }
        }
        if failures.is_empty() {
            return Ok(results);
        }
        SCATTER_FAILURES_TOTAL.inc();
        warn!(failed = failures.len(), total, "scatter-gather failed");
        Err(DispatchError::ShardsFailed { total, failures })
    }
}

async fn elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancellation;
    use crate::test_support::{shard_result, MockTransport, Script};

    fn query() -> Arc<IndexQuery> {
        Arc::new(IndexQuery::new("from index 'Orders/ByCompany'"))
    }

    fn shards(n: u32) -> BTreeSet<ShardNumber> {
        (0..n).collect()
    }

    #[tokio::test]
    async fn every_shard_answers() {
        let transport = MockTransport::default()
            .with(0, Script::Respond(shard_result(1, 10)))
            .with(1, Script::Delay(Duration::from_millis(20), shard_result(2, 20)))
            .with(2, Script::Respond(shard_result(3, 30)));
        let dispatcher = ShardCommandDispatcher::new(Arc::new(transport), None);
        let results = dispatcher.dispatch(query(), &shards(3), &CancelToken::never()).await.unwrap();
        assert_eq!(results.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(results[&1].total_results, 2);
    }

    #[tokio::test]
    async fn shards_run_concurrently() {
        let mut transport = MockTransport::default();
        for shard in 0..4 {
            transport = transport.with(shard, Script::Delay(Duration::from_millis(100), shard_result(1, 1)));
        }
        let dispatcher = ShardCommandDispatcher::new(Arc::new(transport), None);
        let started = std::time::Instant::now();
        dispatcher.dispatch(query(), &shards(4), &CancelToken::never()).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(350));
    }

    #[tokio::test]
    async fn hanging_shard_times_out_whole_operation() {
        let transport = MockTransport::default()
            .with(0, Script::Respond(shard_result(1, 10)))
            .with(1, Script::Respond(shard_result(2, 20)))
            .with(2, Script::Hang);
        let dispatcher = ShardCommandDispatcher::new(Arc::new(transport), Some(Duration::from_millis(50)));
        let err = dispatcher.dispatch(query(), &shards(3), &CancelToken::never()).await.unwrap_err();
        match err {
            DispatchError::ShardsFailed { total, failures } => {
                assert_eq!(total, 3);
                assert_eq!(failures, BTreeMap::from([(2, ShardError::Timeout(Duration::from_millis(50)))]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn collect_keeps_partial_answers() {
        let transport = MockTransport::default()
            .with(0, Script::Respond(shard_result(1, 10)))
            .with(1, Script::Fail(ShardError::Remote("index corrupted".into())));
        let dispatcher = ShardCommandDispatcher::new(Arc::new(transport), None);
        let responses = dispatcher.collect(query(), &shards(3), &CancelToken::never()).await.unwrap();
        assert!(responses[&0].is_ok());
        assert_eq!(responses[&1], Err(ShardError::Remote("index corrupted".into())));
        assert!(matches!(responses[&2], Err(ShardError::Unreachable(_))));
    }

    #[tokio::test]
    async fn one_failure_fails_dispatch() {
        let transport = MockTransport::default()
            .with(0, Script::Respond(shard_result(1, 10)))
            .with(1, Script::Fail(ShardError::Remote("boom".into())));
        let dispatcher = ShardCommandDispatcher::new(Arc::new(transport), None);
        let err = dispatcher.dispatch(query(), &shards(2), &CancelToken::never()).await.unwrap_err();
        assert_eq!(err.to_string(), "1 of 2 shard commands failed");
    }

    #[tokio::test]
    async fn cancel_aborts_outstanding_shards() {
        let transport = MockTransport::default().with(0, Script::Respond(shard_result(1, 10))).with(1, Script::Hang);
        let dispatcher = ShardCommandDispatcher::new(Arc::new(transport), None);
        let (handle, token) = cancellation();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            handle.cancel();
        });
        let err = dispatcher.dispatch(query(), &shards(2), &token).await.unwrap_err();
        assert_eq!(err, DispatchError::Cancelled);
    }

    #[tokio::test]
    async fn every_command_carries_the_operation_token() {
        let transport = Arc::new(MockTransport::default().with(0, Script::Hang).with(1, Script::Hang));
        let dispatcher = ShardCommandDispatcher::new(transport.clone(), None);
        let (handle, token) = cancellation();
        let waiter = transport.clone();
        tokio::spawn(async move {
            while waiter.calls() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            handle.cancel();
        });
        assert_eq!(dispatcher.dispatch(query(), &shards(2), &token).await, Err(DispatchError::Cancelled));
        let seen = transport.tokens();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(CancelToken::is_cancelled));
    }

    #[tokio::test]
    async fn cancelled_before_start_sends_nothing() {
        let transport = Arc::new(MockTransport::default().with(0, Script::Respond(shard_result(1, 10))));
        let dispatcher = ShardCommandDispatcher::new(transport.clone(), None);
        let (handle, token) = cancellation();
        handle.cancel();
        assert_eq!(dispatcher.dispatch(query(), &shards(1), &token).await, Err(DispatchError::Cancelled));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn empty_target_set_is_rejected() {
        let dispatcher = ShardCommandDispatcher::new(Arc::new(MockTransport::default()), None);
        assert_eq!(dispatcher.dispatch(query(), &BTreeSet::new(), &CancelToken::never()).await, Err(DispatchError::NoTargets));
    }

    #[test]
    fn timeout_comes_from_config() {
        let config = ShardingConfig { orchestrator_timeout_secs: Some(90), ..ShardingConfig::default() };
        let dispatcher = ShardCommandDispatcher::from_config(Arc::new(MockTransport::default()), &config);
        assert_eq!(dispatcher.timeout(), Some(Duration::from_secs(90)));
        let dispatcher = ShardCommandDispatcher::from_config(Arc::new(MockTransport::default()), &ShardingConfig::default());
        assert_eq!(dispatcher.timeout(), None);
    }
}
