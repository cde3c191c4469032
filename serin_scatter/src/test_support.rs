//! Scripted in-memory transport for dispatcher and operation tests.
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use serin_topology::ShardNumber;

use crate::cancel::CancelToken;
use crate::command::ShardQueryCommand;
use crate::error::ShardError;
use crate::result::QueryResult;
use crate::transport::ShardTransport;

#[derive(Debug, Clone)]
pub(crate) enum Script {
    Respond(QueryResult),
    Delay(Duration, QueryResult),
    Fail(ShardError),
    Hang,
}

#[derive(Default)]
pub(crate) struct MockTransport {
    scripts: HashMap<ShardNumber, Script>,
    calls: AtomicUsize,
    tokens: Mutex<Vec<CancelToken>>,
}

impl MockTransport {
    pub(crate) fn with(mut self, shard: ShardNumber, script: Script) -> Self {
        self.scripts.insert(shard, script);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn tokens(&self) -> Vec<CancelToken> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl ShardTransport for MockTransport {
    async fn execute(&self, command: ShardQueryCommand) -> Result<QueryResult, ShardError> {
        self.tokens.lock().unwrap().push(command.cancel.clone());
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.scripts.get(&command.shard_number).cloned() {
            Some(Script::Respond(result)) => Ok(result),
            Some(Script::Delay(delay, result)) => {
                tokio::time::sleep(delay).await;
                Ok(result)
            }
            Some(Script::Fail(err)) => Err(err),
            Some(Script::Hang) => {
                let mut cancel = command.cancel;
                cancel.cancelled().await;
                Err(ShardError::Cancelled)
            }
            None => Err(ShardError::Unreachable(format!("no node for shard {}", command.shard_number))),
        }
    }
}

pub(crate) fn shard_result(total: u64, etag: u64) -> QueryResult {
    QueryResult {
        index_name: "Orders/ByCompany".into(),
        total_results: total,
        result_etag: etag,
        results: vec![json!({ "total": total })],
        ..QueryResult::default()
    }
}
