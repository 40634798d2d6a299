use thiserror::Error;

use crate::container::StoreError;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("field '{field}' has {actual} values, expected {expected}")]
    SizeMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },

    #[error("cluster assignment is empty")]
    EmptyAssignment,

    #[error("raw cluster id {0} is negative but not the unclustered id")]
    NegativeId(i64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-record cluster assignment.
///
/// `Unclustered` replaces the raw-id convention where the minimum present
/// id marks unassigned records; group index 0 is reserved for it in the
/// persisted layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClusterLabel {
    Unclustered,
    Clustered(u32),
}

impl ClusterLabel {
    /// Convert raw integer ids as produced by DBSCAN-style tools: the
    /// minimum present id becomes `Unclustered`, every other id keeps its
    /// value. Ids other than the minimum must be non-negative.
    pub fn from_raw(ids: &[i64]) -> Result<Vec<ClusterLabel>, ClusterError> {
        let Some(&lo) = ids.iter().min() else {
            return Err(ClusterError::EmptyAssignment);
        };
        ids.iter()
            .map(|&id| {
                if id == lo {
                    Ok(ClusterLabel::Unclustered)
                } else if id < 0 {
                    Err(ClusterError::NegativeId(id))
                } else {
                    Ok(ClusterLabel::Clustered(id as u32))
                }
            })
            .collect()
    }
}

/// Location of one record in the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordRef {
    /// A localization: frame number plus intra-frame offset.
    Localization { frame: u32, offset: u32 },
    /// A track: track-group index plus intra-group offset.
    Track { track: u32, offset: u32 },
}
