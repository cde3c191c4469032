//! Authoritative topology sources and the refresh loop feeding the store.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::TopologyError;
use crate::snapshot::Topology;
use crate::store::TopologyStore;

/// Supplies the authoritative topology.
#[async_trait]
pub trait TopologySource: Send + Sync {
    /// Fetch the latest topology.
    async fn fetch(&self) -> Result<Topology, TopologyError>;
}

/// Source returning a fixed snapshot.
pub struct StaticTopologySource {
    topology: Topology,
}

impl StaticTopologySource {
    /// Serve `topology` on every fetch.
    pub fn new(topology: Topology) -> Self { Self { topology } }
}

#[async_trait]
impl TopologySource for StaticTopologySource {
    async fn fetch(&self) -> Result<Topology, TopologyError> {
        Ok(self.topology.clone())
    }
}

/// Source re-reading a JSON or YAML file on every fetch.
pub struct FileTopologySource {
    path: PathBuf,
}

impl FileTopologySource {
    /// Read topology documents from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }
}

#[async_trait]
impl TopologySource for FileTopologySource {
    async fn fetch(&self) -> Result<Topology, TopologyError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| TopologyError::Io { path: self.path.clone(), source })?;
        Topology::parse(&self.path, &content)
    }
}

/// Fetch once and publish if the source is ahead. Returns whether a new
/// snapshot was published.
pub async fn refresh_once(store: &TopologyStore, source: &dyn TopologySource) -> Result<bool, TopologyError> {
    let fetched = source.fetch().await?;
    let current = store.version();
    if fetched.version() <= current {
        debug!(current, fetched = fetched.version(), "topology source not ahead");
        return Ok(false);
    }
    match store.publish(fetched) {
        Ok(_) => Ok(true),
        // lost a race with a local update that already moved past this version
        Err(TopologyError::StaleVersion { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Poll `source` every `every` and publish newer snapshots until the task is aborted.
pub fn spawn_refresh(store: Arc<TopologyStore>, source: Arc<dyn TopologySource>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            if let Err(e) = refresh_once(&store, source.as_ref()).await {
                warn!(error = %e, "topology refresh failed; keeping current snapshot");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn refresh_publishes_only_newer_versions() {
        let store = TopologyStore::new(Topology::uniform(2, 1024, 2).unwrap());
        let old = StaticTopologySource::new(Topology::uniform(1, 1024, 4).unwrap());
        assert!(!refresh_once(&store, &old).await.unwrap());
        assert_eq!(store.snapshot().shard_count(), 2);

        let new = StaticTopologySource::new(Topology::uniform(3, 1024, 4).unwrap());
        assert!(refresh_once(&store, &new).await.unwrap());
        assert_eq!(store.snapshot().shard_count(), 4);
    }

    #[tokio::test]
    async fn file_source_reports_invalid_documents() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"version":1,"ranges":[]}}"#).unwrap();
        let source = FileTopologySource::new(file.path());
        assert!(matches!(source.fetch().await, Err(TopologyError::Parse { .. })));
    }

    #[tokio::test]
    async fn background_refresh_picks_up_file_changes() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(file, "version: 8\nranges:\n  - range_start: 0\n    shard_number: 0\n  - range_start: 100\n    shard_number: 1\n").unwrap();
        let store = Arc::new(TopologyStore::new(Topology::uniform(1, 1 << 20, 1).unwrap()));
        let handle = spawn_refresh(store.clone(), Arc::new(FileTopologySource::new(file.path())), Duration::from_millis(10));
        for _ in 0..100 {
            if store.version() == 8 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert_eq!(store.version(), 8);
        assert_eq!(store.snapshot().range_owner(150), 1);
    }
}
