mod extract;
mod partition;
mod reconstruct;
mod types;

#[cfg(test)]
mod tests;

pub use extract::ClusteringData;
pub use reconstruct::{ClustersIter, CrossRefGroup};
pub use types::{ClusterError, ClusterLabel, RecordRef};

use crate::container::{Container, StoreError};
use crate::records::RecordStore;

pub(crate) const CLUSTERS_GROUP: &str = "clusters";

pub(crate) fn cluster_path(index: usize) -> String {
    format!("{}/cl_{}", CLUSTERS_GROUP, index)
}

/// Cluster partitioning and reconstruction over a record store.
///
/// The cluster container lives in a single `clusters` group next to the
/// records; group index 0 is reserved for unclustered records and is
/// excluded from `cluster_count`.
pub struct ClusterStore {
    records: RecordStore,
}

impl ClusterStore {
    pub fn new(records: RecordStore) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn into_records(self) -> RecordStore {
        self.records
    }

    pub fn container(&self) -> &Container {
        self.records.container()
    }

    pub fn has_clusters(&self) -> Result<bool, StoreError> {
        self.container().has_group(CLUSTERS_GROUP)
    }

    /// Number of clusters, excluding the reserved unclustered group.
    /// Zero when no cluster container exists.
    pub fn cluster_count(&self) -> Result<u64, StoreError> {
        Ok(self
            .container()
            .attr_i64_opt(CLUSTERS_GROUP, "cluster_count")?
            .unwrap_or(0) as u64)
    }

    /// Store a short description of how the clustering was done. May be
    /// called before any partitioning.
    pub fn set_clustering_info(&self, info: &str) -> Result<(), StoreError> {
        self.container().create_group(CLUSTERS_GROUP)?;
        self.container().set_attr_text(CLUSTERS_GROUP, "info", info)
    }

    pub fn clustering_info(&self) -> Result<Option<String>, StoreError> {
        self.container().attr_text_opt(CLUSTERS_GROUP, "info")
    }
}
