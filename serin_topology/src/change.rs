//! Detects clients holding an outdated topology.
use crate::store::TopologyStore;

/// Outcome of comparing a client's topology version with the published one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyChange {
    /// The client routes with the current topology.
    Current,
    /// The client must refresh before routing.
    Refresh {
        /// Version the client should fetch.
        current_version: u64,
    },
}

impl TopologyStore {
    /// Whether the published topology is newer than `client_version`.
    pub fn has_changed(&self, client_version: u64) -> bool {
        self.version() > client_version
    }

    /// Compare `client_version` against the published topology.
    pub fn check_client(&self, client_version: u64) -> TopologyChange {
        let current_version = self.version();
        if current_version > client_version {
            TopologyChange::Refresh { current_version }
        } else {
            TopologyChange::Current
        }
    }
}
