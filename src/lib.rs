//! Cluster partitioning and reconstruction for localization microscopy
//! datasets.
//!
//! Records (localizations grouped by frame, or tracks grouped by track
//! index) live in a hierarchical container. An external clusterer assigns
//! a label per record; this crate partitions the records into per-cluster
//! cross-reference groups, persists them next to the records, and can
//! re-join a cross-reference against the store to rebuild full cluster
//! data on demand.

// Public API exports
pub mod clusters;
pub mod container;
pub mod pack;
pub mod records;

// Re-export main types for convenience
pub use container::{Container, FieldArray, StoreError};

pub use records::{FieldBundle, LocsIter, RecordMode, RecordStore, TracksIter};

pub use clusters::{
    ClusterError, ClusterLabel, ClusterStore, ClusteringData, ClustersIter, CrossRefGroup,
    RecordRef,
};

pub use pack::{Manifest, ManifestStats, PackReader, PackWriter};
