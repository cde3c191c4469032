//! Folding per-shard query results into one answer.
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use serin_topology::ShardNumber;

use crate::etag::combine_etags;
use crate::result::{CombinedResult, IncludeKind, IncludePayload, QueryResult};

/// Collects shard results as they arrive; [`finish`](Self::finish) once
/// every expected shard has reported.
///
/// Results are folded in ascending shard order, so the combined answer does
/// not depend on arrival order. Where shards disagree on a field that should
/// be the same everywhere, the lowest shard's value is kept.
#[derive(Debug)]
pub struct CombinedResultBuilder {
    include_kind: IncludeKind,
    pending: BTreeMap<ShardNumber, QueryResult>,
}

impl CombinedResultBuilder {
    /// Empty accumulator producing includes of `include_kind`.
    pub fn new(include_kind: IncludeKind) -> Self {
        Self { include_kind, pending: BTreeMap::new() }
    }

    /// Record the result of `shard`. A second result for the same shard is
    /// dropped with a warning; returns whether `result` was kept.
    pub fn add(&mut self, shard: ShardNumber, result: QueryResult) -> bool {
        match self.pending.entry(shard) {
            Entry::Vacant(slot) => {
                slot.insert(result);
                true
            }
            Entry::Occupied(_) => {
                warn!(shard, "duplicate shard result dropped");
                serin_metrics::COMBINE_WARNINGS_TOTAL.inc();
                false
            }
        }
    }

    /// Produce the combined result.
    pub fn finish(self) -> CombinedResult {
        let mut fold = Fold::new(self.include_kind);
        for (shard, result) in self.pending {
            fold.add(shard, result);
        }
        fold.finish()
    }
}

/// Running aggregate; fed in ascending shard order by the builder.
struct Fold {
    include_kind: IncludeKind,
    index_name: Option<String>,
    included_paths: Option<Option<Vec<String>>>,
    total_results: u64,
    skipped_results: u64,
    is_stale: bool,
    index_timestamp: Option<DateTime<Utc>>,
    last_query_time: Option<DateTime<Utc>>,
    raft_command_index: Option<u64>,
    etags: Vec<(ShardNumber, u64)>,
    shards: Vec<ShardNumber>,
    results: Vec<Value>,
    includes: BTreeMap<String, IncludePayload>,
    missing_includes: BTreeSet<String>,
}

impl Fold {
    fn new(include_kind: IncludeKind) -> Self {
        Self {
            include_kind,
            index_name: None,
            included_paths: None,
            total_results: 0,
            skipped_results: 0,
            is_stale: false,
            index_timestamp: None,
            last_query_time: None,
            raft_command_index: None,
            etags: Vec::new(),
            shards: Vec::new(),
            results: Vec::new(),
            includes: BTreeMap::new(),
            missing_includes: BTreeSet::new(),
        }
    }

    fn add(&mut self, shard: ShardNumber, result: QueryResult) {
        self.total_results += result.total_results;
        self.skipped_results += result.skipped_results;
        self.is_stale |= result.is_stale;
        self.index_timestamp = Some(self.index_timestamp.map_or(result.index_timestamp, |t| t.max(result.index_timestamp)));
        self.last_query_time = Some(self.last_query_time.map_or(result.last_query_time, |t| t.max(result.last_query_time)));
        if let Some(idx) = result.raft_command_index {
            self.raft_command_index = Some(self.raft_command_index.map_or(idx, |cur| cur.max(idx)));
        }
        self.etags.push((shard, result.result_etag));

        match &self.index_name {
            None => self.index_name = Some(result.index_name),
            Some(kept) if *kept != result.index_name => {
                warn!(shard, kept = %kept, got = %result.index_name, "shards disagree on index name");
                serin_metrics::COMBINE_WARNINGS_TOTAL.inc();
            }
            Some(_) => {}
        }
        match &self.included_paths {
            None => self.included_paths = Some(result.included_paths),
            Some(kept) if *kept != result.included_paths => {
                warn!(shard, kept = ?kept, got = ?result.included_paths, "shards disagree on included paths");
                serin_metrics::COMBINE_WARNINGS_TOTAL.inc();
            }
            Some(_) => {}
        }

        for (id, body) in result.includes {
            match body {
                Some(data) => {
                    self.missing_includes.remove(&id);
                    if !self.includes.contains_key(&id) {
                        let payload = IncludePayload::new(self.include_kind, &id, data);
                        self.includes.insert(id, payload);
                    }
                }
                None if !self.includes.contains_key(&id) => {
                    self.missing_includes.insert(id);
                }
                None => {}
            }
        }

        self.shards.push(shard);
        self.results.extend(result.results);
    }

    fn finish(self) -> CombinedResult {
        CombinedResult {
            index_name: self.index_name.unwrap_or_default(),
            included_paths: self.included_paths.flatten(),
            total_results: self.total_results,
            skipped_results: self.skipped_results,
            is_stale: self.is_stale,
            index_timestamp: self.index_timestamp.unwrap_or_default(),
            last_query_time: self.last_query_time.unwrap_or_default(),
            raft_command_index: self.raft_command_index,
            result_etag: combine_etags(self.etags),
            results: self.results,
            includes: self.includes,
            missing_includes: self.missing_includes,
            shards: self.shards,
        }
    }
}

/// Combines a complete set of per-shard results.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultCombiner {
    include_kind: IncludeKind,
}

impl ResultCombiner {
    /// Combiner producing includes of `include_kind`.
    pub fn new(include_kind: IncludeKind) -> Self {
        Self { include_kind }
    }

    /// Fold every shard's result into one [`CombinedResult`].
    pub fn combine(&self, results: BTreeMap<ShardNumber, QueryResult>) -> CombinedResult {
        let mut builder = CombinedResultBuilder::new(self.include_kind);
        for (shard, result) in results {
            builder.add(shard, result);
        }
        builder.finish()
    }
}
