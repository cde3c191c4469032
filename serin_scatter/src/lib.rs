//! Scatter-gather query execution across SerinDB shards.
//!
//! A query is sent to every relevant shard concurrently; the per-shard
//! results are combined into one answer only when every shard succeeded.
#![deny(missing_docs)]

mod cancel;
mod combine;
mod command;
mod dispatch;
mod error;
mod etag;
mod operation;
mod result;
mod transport;

#[cfg(test)]
mod test_support;

pub use cancel::{cancellation, CancelHandle, CancelToken};
pub use combine::{CombinedResultBuilder, ResultCombiner};
pub use command::{resolve_targets, IndexQuery, ShardQueryCommand, ShardScope};
pub use dispatch::{ShardCommandDispatcher, ShardResponses};
pub use error::{DispatchError, ScatterError, ShardError};
pub use etag::{combine_etags, combine_hash};
pub use operation::{QueryOutcome, ShardedQueryOperation};
pub use result::{CombinedResult, IncludeKind, IncludePayload, QueryResult};
pub use transport::ShardTransport;
