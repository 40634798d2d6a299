use std::collections::BTreeSet;

use log::debug;

use crate::container::{Container, StoreError};
use crate::records::FieldBundle;

use super::types::{ClusterError, ClusterLabel};
use super::{cluster_path, ClusterStore, CLUSTERS_GROUP};

impl ClusterStore {
    /// Partition the records into cluster cross-reference groups.
    ///
    /// `labels` assigns one `ClusterLabel` per record; `bundle` carries the
    /// per-record cross-reference fields (and any other data to keep with
    /// each cluster), every field the same length as `labels`.
    ///
    /// Any existing cluster container is replaced. Group `cl_0` always
    /// holds the unclustered records, even when there are none; distinct
    /// clustered ids get dense indices from 1 in ascending id order, so a
    /// group's index does not equal its raw id when ids are sparse. The
    /// whole partition runs in one transaction: on failure the previous
    /// container is left untouched.
    pub fn add_clusters(
        &self,
        labels: &[ClusterLabel],
        bundle: &FieldBundle,
    ) -> Result<(), ClusterError> {
        if labels.is_empty() {
            return Err(ClusterError::EmptyAssignment);
        }
        for (name, data) in bundle.iter() {
            if data.len() != labels.len() {
                return Err(ClusterError::SizeMismatch {
                    field: name.to_string(),
                    expected: labels.len(),
                    actual: data.len(),
                });
            }
        }

        let ids: BTreeSet<u32> = labels
            .iter()
            .filter_map(|label| match label {
                ClusterLabel::Clustered(id) => Some(*id),
                ClusterLabel::Unclustered => None,
            })
            .collect();

        self.container().with_transaction(|c| {
            if c.has_group(CLUSTERS_GROUP)? {
                c.delete_group(CLUSTERS_GROUP)?;
            }
            c.create_group(CLUSTERS_GROUP)?;

            let unclustered: Vec<bool> = labels
                .iter()
                .map(|label| *label == ClusterLabel::Unclustered)
                .collect();
            write_cluster_group(c, 0, bundle, &unclustered)?;

            for (next, id) in ids.iter().enumerate() {
                let mask: Vec<bool> = labels
                    .iter()
                    .map(|label| *label == ClusterLabel::Clustered(*id))
                    .collect();
                write_cluster_group(c, next + 1, bundle, &mask)?;
            }

            c.set_attr_i64(CLUSTERS_GROUP, "cluster_count", ids.len() as i64)?;
            Ok(())
        })?;

        debug!("partitioned {} records into {} clusters", labels.len(), ids.len());
        Ok(())
    }
}

fn write_cluster_group(
    container: &Container,
    index: usize,
    bundle: &FieldBundle,
    mask: &[bool],
) -> Result<(), StoreError> {
    let path = cluster_path(index);
    container.create_group(&path)?;
    for (name, data) in bundle.iter() {
        container.write_dataset(&path, name, &data.masked(mask))?;
    }
    let size = mask.iter().filter(|m| **m).count();
    container.set_attr_i64(&path, "size", size as i64)?;
    Ok(())
}
