use log::debug;

use crate::container::{Container, StoreError};
use crate::records::FieldBundle;

const META_GROUP: &str = "metadata";
const LOCS_GROUP: &str = "locs";
const TRACKS_GROUP: &str = "tracks";

fn frame_path(frame: u32) -> String {
    format!("{}/fr_{}", LOCS_GROUP, frame)
}

fn track_path(index: u32) -> String {
    format!("{}/tr_{}", TRACKS_GROUP, index)
}

/// Store of localization records (grouped by frame) or track records
/// (grouped by track index) inside a hierarchical container.
///
/// Localization positions are in pixels (`x`, `y`) and micrometers (`z`);
/// `pixel_size` is the calibration factor in nanometers per pixel. Drift
/// offsets, when present, are per-frame attributes applied on read.
pub struct RecordStore {
    container: Container,
}

impl RecordStore {
    /// Initialize an empty record store inside `container`.
    pub fn create(container: Container, pixel_size: f64) -> Result<Self, StoreError> {
        container.create_group(META_GROUP)?;
        container.set_attr_f64(META_GROUP, "pixel_size", pixel_size)?;
        container.set_attr_i64(META_GROUP, "n_locs", 0)?;
        container.set_attr_i64(META_GROUP, "n_frames", 0)?;
        container.set_attr_i64(META_GROUP, "n_tracks", 0)?;
        container.set_attr_i64(META_GROUP, "n_track_groups", 0)?;
        Ok(Self { container })
    }

    /// Open a store previously initialized with `create`.
    pub fn open(container: Container) -> Result<Self, StoreError> {
        if !container.has_group(META_GROUP)? {
            return Err(StoreError::AbsentGroup(META_GROUP.to_string()));
        }
        Ok(Self { container })
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn into_container(self) -> Container {
        self.container
    }

    /// Calibration factor in nanometers per pixel.
    pub fn pixel_size(&self) -> Result<f64, StoreError> {
        self.container.attr_f64(META_GROUP, "pixel_size")
    }

    pub fn n_localizations(&self) -> Result<u64, StoreError> {
        Ok(self.container.attr_i64(META_GROUP, "n_locs")? as u64)
    }

    /// Movie length; frames without localizations have no group.
    pub fn n_frames(&self) -> Result<u64, StoreError> {
        Ok(self.container.attr_i64(META_GROUP, "n_frames")? as u64)
    }

    /// Total track records across all track groups.
    pub fn n_tracks(&self) -> Result<u64, StoreError> {
        Ok(self.container.attr_i64(META_GROUP, "n_tracks")? as u64)
    }

    pub fn n_track_groups(&self) -> Result<u64, StoreError> {
        Ok(self.container.attr_i64(META_GROUP, "n_track_groups")? as u64)
    }

    pub fn has_localizations(&self) -> Result<bool, StoreError> {
        Ok(self.n_localizations()? > 0)
    }

    pub fn has_tracks(&self) -> Result<bool, StoreError> {
        Ok(self.n_tracks()? > 0)
    }

    fn check_rectangular(bundle: &FieldBundle) -> Result<usize, StoreError> {
        let expected = bundle.record_count();
        for (name, data) in bundle.iter() {
            if data.len() != expected {
                return Err(StoreError::FieldLength {
                    field: name.to_string(),
                    expected,
                    actual: data.len(),
                });
            }
        }
        Ok(expected)
    }

    /// Add the localizations of one frame. Each frame is written once.
    pub fn add_localizations(&self, frame: u32, bundle: &FieldBundle) -> Result<(), StoreError> {
        let count = Self::check_rectangular(bundle)?;
        let path = frame_path(frame);
        if self.container.has_group(&path)? {
            return Err(StoreError::GroupExists(path));
        }
        self.container.with_transaction(|c| {
            c.create_group(&path)?;
            for (name, data) in bundle.iter() {
                c.write_dataset(&path, name, data)?;
            }
            let n_locs = c.attr_i64(META_GROUP, "n_locs")? + count as i64;
            c.set_attr_i64(META_GROUP, "n_locs", n_locs)?;
            let n_frames = c.attr_i64(META_GROUP, "n_frames")?.max(frame as i64 + 1);
            c.set_attr_i64(META_GROUP, "n_frames", n_frames)?;
            Ok(())
        })?;
        debug!("added {} localizations in frame {}", count, frame);
        Ok(())
    }

    /// Append a track group; returns its index.
    pub fn add_track_group(&self, bundle: &FieldBundle) -> Result<u32, StoreError> {
        let count = Self::check_rectangular(bundle)?;
        let index = self.n_track_groups()? as u32;
        let path = track_path(index);
        self.container.with_transaction(|c| {
            c.create_group(&path)?;
            for (name, data) in bundle.iter() {
                c.write_dataset(&path, name, data)?;
            }
            let n_tracks = c.attr_i64(META_GROUP, "n_tracks")? + count as i64;
            c.set_attr_i64(META_GROUP, "n_tracks", n_tracks)?;
            c.set_attr_i64(META_GROUP, "n_track_groups", index as i64 + 1)?;
            Ok(())
        })?;
        debug!("added track group {} with {} tracks", index, count);
        Ok(index)
    }

    /// Record stage drift for a frame: `dx`/`dy` in pixels, `dz` in
    /// micrometers. The frame group must already exist.
    pub fn set_drift(&self, frame: u32, dx: f64, dy: f64, dz: f64) -> Result<(), StoreError> {
        let path = frame_path(frame);
        if !self.container.has_group(&path)? {
            return Err(StoreError::AbsentGroup(path));
        }
        self.container.set_attr_f64(&path, "dx", dx)?;
        self.container.set_attr_f64(&path, "dy", dy)?;
        self.container.set_attr_f64(&path, "dz", dz)?;
        Ok(())
    }

    fn read_group(
        &self,
        path: &str,
        fields: Option<&[&str]>,
    ) -> Result<FieldBundle, StoreError> {
        let mut bundle = FieldBundle::new();
        match fields {
            Some(names) => {
                for name in names {
                    bundle.insert(name, self.container.read_dataset(path, name)?);
                }
            }
            None => {
                for name in self.container.dataset_names(path)? {
                    bundle.insert(&name, self.container.read_dataset(path, &name)?);
                }
            }
        }
        Ok(bundle)
    }

    fn apply_drift(&self, path: &str, bundle: &mut FieldBundle) -> Result<(), StoreError> {
        let dx = self.container.attr_f64_opt(path, "dx")?.unwrap_or(0.0);
        let dy = self.container.attr_f64_opt(path, "dy")?.unwrap_or(0.0);
        let dz = self.container.attr_f64_opt(path, "dz")?.unwrap_or(0.0);
        for (name, offset) in [("x", dx), ("y", dy), ("z", dz)] {
            if offset == 0.0 {
                continue;
            }
            if let Some(data) = bundle.get_mut(name) {
                if let crate::container::FieldArray::F64(values) = data {
                    for v in values.iter_mut() {
                        *v += offset;
                    }
                }
            }
        }
        Ok(())
    }

    /// Localizations of one frame, optionally a subset of fields,
    /// optionally drift corrected.
    pub fn locs_in_frame(
        &self,
        frame: u32,
        fields: Option<&[&str]>,
        drift_corrected: bool,
    ) -> Result<FieldBundle, StoreError> {
        let path = frame_path(frame);
        if !self.container.has_group(&path)? {
            return Err(StoreError::AbsentGroup(path));
        }
        let mut bundle = self.read_group(&path, fields)?;
        if drift_corrected {
            self.apply_drift(&path, &mut bundle)?;
        }
        Ok(bundle)
    }

    /// The track group at `index`. Track positions are drift corrected
    /// when the tracks are built, so no flag here.
    pub fn track_by_index(
        &self,
        index: u32,
        fields: Option<&[&str]>,
    ) -> Result<FieldBundle, StoreError> {
        let path = track_path(index);
        if !self.container.has_group(&path)? {
            return Err(StoreError::AbsentGroup(path));
        }
        self.read_group(&path, fields)
    }

    /// Iterate non-empty frames in ascending frame order.
    pub fn locs_iter(
        &self,
        fields: Option<&[&str]>,
        drift_corrected: bool,
    ) -> Result<LocsIter<'_>, StoreError> {
        Ok(LocsIter {
            store: self,
            fields: fields.map(|f| f.iter().map(|s| s.to_string()).collect()),
            drift_corrected,
            frame: 0,
            n_frames: self.n_frames()? as u32,
            failed: false,
        })
    }

    /// Iterate track groups in ascending index order.
    pub fn tracks_iter(&self, fields: Option<&[&str]>) -> Result<TracksIter<'_>, StoreError> {
        Ok(TracksIter {
            store: self,
            fields: fields.map(|f| f.iter().map(|s| s.to_string()).collect()),
            index: 0,
            n_groups: self.n_track_groups()? as u32,
            failed: false,
        })
    }
}

fn as_str_slice(fields: &Option<Vec<String>>) -> Option<Vec<&str>> {
    fields
        .as_ref()
        .map(|f| f.iter().map(String::as_str).collect())
}

pub struct LocsIter<'a> {
    store: &'a RecordStore,
    fields: Option<Vec<String>>,
    drift_corrected: bool,
    frame: u32,
    n_frames: u32,
    failed: bool,
}

impl Iterator for LocsIter<'_> {
    type Item = Result<(u32, FieldBundle), StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let fields = as_str_slice(&self.fields);
        while self.frame < self.n_frames {
            let frame = self.frame;
            self.frame += 1;
            match self.store.container.has_group(&frame_path(frame)) {
                Ok(false) => continue,
                Ok(true) => {
                    let result = self
                        .store
                        .locs_in_frame(frame, fields.as_deref(), self.drift_corrected);
                    if result.is_err() {
                        self.failed = true;
                    }
                    return Some(result.map(|bundle| (frame, bundle)));
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

pub struct TracksIter<'a> {
    store: &'a RecordStore,
    fields: Option<Vec<String>>,
    index: u32,
    n_groups: u32,
    failed: bool,
}

impl Iterator for TracksIter<'_> {
    type Item = Result<(u32, FieldBundle), StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.index >= self.n_groups {
            return None;
        }
        let index = self.index;
        self.index += 1;
        let fields = as_str_slice(&self.fields);
        let result = self.store.track_by_index(index, fields.as_deref());
        if result.is_err() {
            self.failed = true;
        }
        Some(result.map(|bundle| (index, bundle)))
    }
}
