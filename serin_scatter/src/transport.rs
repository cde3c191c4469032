use async_trait::async_trait;

use crate::command::ShardQueryCommand;
use crate::error::ShardError;
use crate::result::QueryResult;

/// Executes a command against a shard's preferred node.
///
/// Retries and connection pooling are the transport's business; the
/// dispatcher calls each shard exactly once per operation.
#[async_trait]
pub trait ShardTransport: Send + Sync {
    /// Run `command` on `command.shard_number`.
    async fn execute(&self, command: ShardQueryCommand) -> Result<QueryResult, ShardError>;
}
