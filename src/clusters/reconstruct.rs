use crate::container::StoreError;
use crate::records::{FieldBundle, RecordMode};

use super::types::{ClusterError, RecordRef};
use super::{cluster_path, ClusterStore};

/// The stored cross-reference of one cluster: enough indices to relocate
/// each member in the record store, plus any auxiliary fields kept at
/// partition time.
pub struct CrossRefGroup {
    index: usize,
    size: u64,
    mode: RecordMode,
    crossref: FieldBundle,
}

impl CrossRefGroup {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Member count, from the stored `size` attribute.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mode(&self) -> RecordMode {
        self.mode
    }

    pub fn crossref(&self) -> &FieldBundle {
        &self.crossref
    }

    /// Typed record references, in stored member order.
    pub fn record_refs(&self) -> Result<Vec<RecordRef>, StoreError> {
        let offsets = self.index_field("loc_id")?;
        match self.mode {
            RecordMode::Localizations => {
                let frames = self.index_field("frame")?;
                Ok(frames
                    .iter()
                    .zip(offsets)
                    .map(|(&frame, offset)| RecordRef::Localization {
                        frame: frame as u32,
                        offset: offset as u32,
                    })
                    .collect())
            }
            RecordMode::Tracks => {
                let tracks = self.index_field("track_id")?;
                Ok(tracks
                    .iter()
                    .zip(offsets)
                    .map(|(&track, offset)| RecordRef::Track {
                        track: track as u32,
                        offset: offset as u32,
                    })
                    .collect())
            }
        }
    }

    fn index_field(&self, name: &str) -> Result<Vec<i64>, StoreError> {
        let data = self
            .crossref
            .get(name)
            .ok_or_else(|| StoreError::AbsentDataset {
                group: cluster_path(self.index),
                name: name.to_string(),
            })?;
        data.as_i64()
            .map(|v| v.to_vec())
            .ok_or_else(|| StoreError::DtypeMismatch {
                name: name.to_string(),
                expected: "i64",
                actual: data.dtype().to_string(),
            })
    }
}

impl ClusterStore {
    /// The cross-reference group at dense `index`, or `None` when out of
    /// range or when no cluster container exists.
    pub fn cluster_group(&self, index: usize) -> Result<Option<CrossRefGroup>, StoreError> {
        let path = cluster_path(index);
        if !self.container().has_group(&path)? {
            return Ok(None);
        }
        let size = self.container().attr_i64(&path, "size")? as u64;
        let mut crossref = FieldBundle::new();
        for name in self.container().dataset_names(&path)? {
            crossref.insert(&name, self.container().read_dataset(&path, &name)?);
        }
        let mode = if crossref.contains("frame") {
            RecordMode::Localizations
        } else if crossref.contains("track_id") {
            RecordMode::Tracks
        } else {
            return Err(StoreError::Corrupt(format!(
                "cluster group '{}' has neither 'frame' nor 'track_id'",
                path
            )));
        };
        Ok(Some(CrossRefGroup {
            index,
            size,
            mode,
            crossref,
        }))
    }

    /// Full field data for every member of a cluster, in stored member
    /// order, joined against the record store.
    ///
    /// This re-reads the whole frame or track group for every member, so
    /// it costs one group read per member. Fine for small clusters; use
    /// `clusters_iter` when walking many clusters.
    ///
    /// Returns an empty bundle when the group does not exist or has zero
    /// members. A cross-reference pointing at a missing frame or track is
    /// a data-integrity failure and propagates as a store error.
    pub fn cluster_data(
        &self,
        index: usize,
        fields: Option<&[&str]>,
    ) -> Result<FieldBundle, ClusterError> {
        let mut out = FieldBundle::new();
        let Some(group) = self.cluster_group(index)? else {
            return Ok(out);
        };
        let refs = group.record_refs()?;
        if refs.is_empty() {
            return Ok(out);
        }

        for (i, record) in refs.iter().enumerate() {
            let (record_fields, offset) = match record {
                RecordRef::Localization { frame, offset } => (
                    self.records().locs_in_frame(*frame, fields, true)?,
                    *offset as usize,
                ),
                RecordRef::Track { track, offset } => (
                    self.records().track_by_index(*track, fields)?,
                    *offset as usize,
                ),
            };
            if out.is_empty() {
                // Output dtype comes from the first lookup.
                for (name, data) in record_fields.iter() {
                    out.insert(name, data.zeros_like(refs.len()));
                }
            }
            for (name, data) in record_fields.iter() {
                let slot = out.get_mut(name).ok_or_else(|| {
                    StoreError::Corrupt(format!("field '{}' appeared mid-cluster", name))
                })?;
                slot.copy_elem(i, data, offset)?;
            }
        }

        // Keep the raw cross-reference fields alongside the joined data.
        for (name, data) in group.crossref().iter() {
            out.insert(name, data.clone());
        }
        Ok(out)
    }

    /// Iterate clusters as `(index, data)` pairs.
    ///
    /// Only groups whose stored size is strictly greater than `min_size`
    /// are yielded; `min_size` should be at least the minimum cluster size
    /// used by the clusterer. The reserved unclustered group is skipped
    /// unless `skip_unclustered` is false. Yields nothing when no cluster
    /// container exists.
    pub fn clusters_iter(
        &self,
        fields: Option<&[&str]>,
        min_size: u64,
        skip_unclustered: bool,
    ) -> Result<ClustersIter<'_>, StoreError> {
        let (next, last) = if self.has_clusters()? {
            let count = self.cluster_count()? as usize;
            (if skip_unclustered { 1 } else { 0 }, Some(count))
        } else {
            (0, None)
        };
        Ok(ClustersIter {
            store: self,
            fields: fields.map(|f| f.iter().map(|s| s.to_string()).collect()),
            min_size,
            next,
            last,
            failed: false,
        })
    }
}

/// Lazy cluster traversal; re-invoke `clusters_iter` to restart.
pub struct ClustersIter<'a> {
    store: &'a ClusterStore,
    fields: Option<Vec<String>>,
    min_size: u64,
    next: usize,
    /// Last dense index to visit, inclusive; `None` when there is no
    /// cluster container.
    last: Option<usize>,
    failed: bool,
}

impl Iterator for ClustersIter<'_> {
    type Item = Result<(usize, FieldBundle), ClusterError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let last = self.last?;
        while self.next <= last {
            let index = self.next;
            self.next += 1;
            let group = match self.store.cluster_group(index) {
                Ok(Some(group)) => group,
                Ok(None) => continue,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e.into()));
                }
            };
            if group.size() > self.min_size {
                let fields: Option<Vec<&str>> = self
                    .fields
                    .as_ref()
                    .map(|f| f.iter().map(String::as_str).collect());
                let result = self.store.cluster_data(index, fields.as_deref());
                if result.is_err() {
                    self.failed = true;
                }
                return Some(result.map(|data| (index, data)));
            }
        }
        None
    }
}
