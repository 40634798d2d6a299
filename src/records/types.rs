use crate::container::FieldArray;

/// Whether a dataset stores per-frame localizations or assembled tracks.
///
/// A dataset is in exactly one mode; the two are never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMode {
    Localizations,
    Tracks,
}

/// Ordered mapping from field name to a typed numeric array.
///
/// Insertion order is preserved; lookup is linear, which is fine for the
/// handful of fields a record group carries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldBundle {
    fields: Vec<(String, FieldArray)>,
}

impl FieldBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, replacing (in place) any field of the same name.
    pub fn insert(&mut self, name: &str, data: FieldArray) {
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| n == name) {
            slot.1 = data;
        } else {
            self.fields.push((name.to_string(), data));
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldArray> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, a)| a)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut FieldArray> {
        self.fields
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, a)| a)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldArray)> {
        self.fields.iter().map(|(n, a)| (n.as_str(), a))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    /// Number of fields (not records).
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Length of the per-record arrays, taken from the first field.
    pub fn record_count(&self) -> usize {
        self.fields.first().map(|(_, a)| a.len()).unwrap_or(0)
    }
}

impl<const N: usize> From<[(&str, FieldArray); N]> for FieldBundle {
    fn from(fields: [(&str, FieldArray); N]) -> Self {
        let mut bundle = FieldBundle::new();
        for (name, data) in fields {
            bundle.insert(name, data);
        }
        bundle
    }
}
