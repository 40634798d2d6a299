use log::debug;

use crate::container::{FieldArray, StoreError};
use crate::records::FieldBundle;

use super::types::ClusterError;
use super::ClusterStore;

/// Flat per-record arrays in a clustering-friendly layout.
///
/// `x`/`y`/`z` are in nanometers, `category` is the record category.
/// `crossrefs` holds the cross-reference fields to hand back to
/// `add_clusters` together with the assignment: `loc_id` + `track_id` in
/// track mode, `frame` + `loc_id` in localization mode.
pub struct ClusteringData {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    pub category: Vec<i64>,
    pub crossrefs: FieldBundle,
}

impl ClusteringData {
    pub fn record_count(&self) -> usize {
        self.x.len()
    }
}

impl ClusterStore {
    /// Stream the record store once and build the flat arrays clustering
    /// works on.
    ///
    /// Track mode is chosen whenever the store has tracks, localization
    /// mode otherwise. Positions are converted from pixels to nanometers
    /// with the store's calibration factor; `z` (micrometers) is scaled to
    /// nanometers only when `include_z` and stays zero-filled otherwise,
    /// keeping 2D clustering free of z values.
    pub fn data_for_clustering(&self, include_z: bool) -> Result<ClusteringData, ClusterError> {
        let pix_to_nm = self.records().pixel_size()?;
        if self.records().has_tracks()? {
            self.track_data_for_clustering(pix_to_nm, include_z)
        } else {
            self.loc_data_for_clustering(pix_to_nm, include_z)
        }
    }

    fn track_data_for_clustering(
        &self,
        pix_to_nm: f64,
        include_z: bool,
    ) -> Result<ClusteringData, ClusterError> {
        let total = self.records().n_tracks()? as usize;
        let mut out = FlatArrays::new(total);
        let mut loc_id = vec![0i64; total];
        let mut track_id = vec![0i64; total];

        let fields = selected_fields(include_z);
        let mut start = 0;
        for item in self.records().tracks_iter(Some(&fields))? {
            let (index, tracks) = item?;
            let n = out.fill_group(&tracks, start, pix_to_nm, include_z)?;
            for j in 0..n {
                loc_id[start + j] = j as i64;
                track_id[start + j] = index as i64;
            }
            start += n;
        }
        debug!("extracted {} track records for clustering", start);

        let mut crossrefs = FieldBundle::new();
        crossrefs.insert("loc_id", FieldArray::I64(loc_id));
        crossrefs.insert("track_id", FieldArray::I64(track_id));
        Ok(out.into_clustering_data(crossrefs))
    }

    fn loc_data_for_clustering(
        &self,
        pix_to_nm: f64,
        include_z: bool,
    ) -> Result<ClusteringData, ClusterError> {
        let total = self.records().n_localizations()? as usize;
        let mut out = FlatArrays::new(total);
        let mut frame = vec![0i64; total];
        let mut loc_id = vec![0i64; total];

        let fields = selected_fields(include_z);
        let mut start = 0;
        for item in self.records().locs_iter(Some(&fields), true)? {
            let (f_num, locs) = item?;
            let n = out.fill_group(&locs, start, pix_to_nm, include_z)?;
            for j in 0..n {
                frame[start + j] = f_num as i64;
                loc_id[start + j] = j as i64;
            }
            start += n;
        }
        debug!("extracted {} localizations for clustering", start);

        let mut crossrefs = FieldBundle::new();
        crossrefs.insert("frame", FieldArray::I64(frame));
        crossrefs.insert("loc_id", FieldArray::I64(loc_id));
        Ok(out.into_clustering_data(crossrefs))
    }
}

fn selected_fields(include_z: bool) -> Vec<&'static str> {
    let mut fields = vec!["x", "y", "category"];
    if include_z {
        fields.push("z");
    }
    fields
}

struct FlatArrays {
    x: Vec<f64>,
    y: Vec<f64>,
    z: Vec<f64>,
    category: Vec<i64>,
}

impl FlatArrays {
    fn new(total: usize) -> Self {
        Self {
            x: vec![0.0; total],
            y: vec![0.0; total],
            z: vec![0.0; total],
            category: vec![0; total],
        }
    }

    /// Copy one group's records in at `start`; returns the group size.
    fn fill_group(
        &mut self,
        group: &FieldBundle,
        start: usize,
        pix_to_nm: f64,
        include_z: bool,
    ) -> Result<usize, StoreError> {
        let x = require_f64(group, "x")?;
        let y = require_f64(group, "y")?;
        let category = require_i64(group, "category")?;
        let n = x.len();
        if start + n > self.x.len() {
            return Err(StoreError::Corrupt(
                "record count attribute disagrees with stored groups".to_string(),
            ));
        }
        for j in 0..n {
            self.x[start + j] = x[j] * pix_to_nm;
            self.y[start + j] = y[j] * pix_to_nm;
            self.category[start + j] = category[j];
        }
        if include_z {
            let z = require_f64(group, "z")?;
            for j in 0..n {
                // Micrometers to nanometers.
                self.z[start + j] = z[j] * 1000.0;
            }
        }
        Ok(n)
    }

    fn into_clustering_data(self, crossrefs: FieldBundle) -> ClusteringData {
        ClusteringData {
            x: self.x,
            y: self.y,
            z: self.z,
            category: self.category,
            crossrefs,
        }
    }
}

fn require_f64<'a>(group: &'a FieldBundle, name: &str) -> Result<&'a [f64], StoreError> {
    let data = group.get(name).ok_or_else(|| StoreError::AbsentDataset {
        group: "record group".to_string(),
        name: name.to_string(),
    })?;
    data.as_f64().ok_or_else(|| StoreError::DtypeMismatch {
        name: name.to_string(),
        expected: "f64",
        actual: data.dtype().to_string(),
    })
}

fn require_i64<'a>(group: &'a FieldBundle, name: &str) -> Result<&'a [i64], StoreError> {
    let data = group.get(name).ok_or_else(|| StoreError::AbsentDataset {
        group: "record group".to_string(),
        name: name.to_string(),
    })?;
    data.as_i64().ok_or_else(|| StoreError::DtypeMismatch {
        name: name.to_string(),
        expected: "i64",
        actual: data.dtype().to_string(),
    })
}
