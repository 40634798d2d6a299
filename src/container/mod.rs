mod error;


pub use error::StoreError;

use log::debug;
use rusqlite::{params, Connection, OptionalExtension};

/// A typed numeric array, the payload of one dataset.
///
/// Positions and intensities are stored as `F64`, indices and categories
/// as `I64`. The dtype round-trips through the container.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldArray {
    F64(Vec<f64>),
    I64(Vec<i64>),
}

impl FieldArray {
    pub fn len(&self) -> usize {
        match self {
            FieldArray::F64(v) => v.len(),
            FieldArray::I64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dtype tag used in the datasets table.
    pub fn dtype(&self) -> &'static str {
        match self {
            FieldArray::F64(_) => "f64",
            FieldArray::I64(_) => "i64",
        }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match self {
            FieldArray::F64(v) => Some(v),
            FieldArray::I64(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match self {
            FieldArray::I64(v) => Some(v),
            FieldArray::F64(_) => None,
        }
    }

    /// The subsequence selected by a boolean mask of the same length.
    pub fn masked(&self, mask: &[bool]) -> FieldArray {
        match self {
            FieldArray::F64(v) => FieldArray::F64(
                v.iter().zip(mask).filter(|(_, m)| **m).map(|(x, _)| *x).collect(),
            ),
            FieldArray::I64(v) => FieldArray::I64(
                v.iter().zip(mask).filter(|(_, m)| **m).map(|(x, _)| *x).collect(),
            ),
        }
    }

    /// A zero-filled array of the same dtype.
    pub fn zeros_like(&self, len: usize) -> FieldArray {
        match self {
            FieldArray::F64(_) => FieldArray::F64(vec![0.0; len]),
            FieldArray::I64(_) => FieldArray::I64(vec![0; len]),
        }
    }

    /// Copy `src[src_idx]` into `self[dst]`. Both arrays must share a dtype.
    pub fn copy_elem(
        &mut self,
        dst: usize,
        src: &FieldArray,
        src_idx: usize,
    ) -> Result<(), StoreError> {
        if dst >= self.len() || src_idx >= src.len() {
            return Err(StoreError::Corrupt(format!(
                "element index out of range ({} of {}, {} of {})",
                dst,
                self.len(),
                src_idx,
                src.len()
            )));
        }
        match (self, src) {
            (FieldArray::F64(d), FieldArray::F64(s)) => d[dst] = s[src_idx],
            (FieldArray::I64(d), FieldArray::I64(s)) => d[dst] = s[src_idx],
            (d, s) => {
                return Err(StoreError::DtypeMismatch {
                    name: "element copy".to_string(),
                    expected: d.dtype(),
                    actual: s.dtype().to_string(),
                })
            }
        }
        Ok(())
    }

    /// Encode as little-endian bytes for BLOB storage.
    fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            FieldArray::F64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            FieldArray::I64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        }
    }

    /// Decode a BLOB written by `to_le_bytes`.
    fn from_le_bytes(dtype: &str, bytes: &[u8], name: &str) -> Result<FieldArray, StoreError> {
        if bytes.len() % 8 != 0 {
            return Err(StoreError::Corrupt(format!(
                "dataset '{}' has a truncated payload ({} bytes)",
                name,
                bytes.len()
            )));
        }
        let chunks = bytes.chunks_exact(8);
        match dtype {
            "f64" => Ok(FieldArray::F64(
                chunks
                    .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            )),
            "i64" => Ok(FieldArray::I64(
                chunks
                    .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            )),
            other => Err(StoreError::Corrupt(format!(
                "dataset '{}' has unknown dtype '{}'",
                name, other
            ))),
        }
    }
}

/// Hierarchical container over a single SQLite connection.
///
/// Groups are addressed by slash-separated paths (`locs/fr_0`,
/// `clusters/cl_3`). Each group carries named scalar attributes and named
/// numeric datasets. One open connection per container; callers serialize
/// access.
pub struct Container {
    conn: Connection,
}

impl Container {
    /// Open (creating if necessary) a container file
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let container = Self { conn };
        container.init_schema()?;
        debug!("opened container at {}", path);
        Ok(container)
    }

    /// Create an in-memory container
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let container = Self { conn };
        container.init_schema()?;
        Ok(container)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS groups (
                path TEXT PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS attrs (
                group_path TEXT NOT NULL,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                int_value INTEGER,
                float_value REAL,
                text_value TEXT,
                PRIMARY KEY (group_path, name)
            );

            CREATE TABLE IF NOT EXISTS datasets (
                group_path TEXT NOT NULL,
                name TEXT NOT NULL,
                dtype TEXT NOT NULL,
                data BLOB NOT NULL,
                PRIMARY KEY (group_path, name)
            );
            "#,
        )?;
        Ok(())
    }

    /// Run `f` inside a single transaction; rolls back if `f` fails.
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Self) -> Result<T, StoreError>,
    {
        let tx = self.conn.unchecked_transaction()?;
        let out = f(self)?;
        tx.commit()?;
        Ok(out)
    }

    /// Create a group, including any missing ancestors. Idempotent.
    pub fn create_group(&self, path: &str) -> Result<(), StoreError> {
        if path.is_empty() {
            return Err(StoreError::Corrupt("empty group path".to_string()));
        }
        let mut prefix = String::new();
        for part in path.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(part);
            self.conn.execute(
                "INSERT OR IGNORE INTO groups (path) VALUES (?1)",
                params![prefix],
            )?;
        }
        Ok(())
    }

    /// Delete a group with its attributes, datasets and children.
    ///
    /// Runs as plain deletes so it can be called inside `with_transaction`;
    /// wrap it there when the delete must be atomic with other changes.
    pub fn delete_group(&self, path: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM datasets WHERE group_path = ?1 OR group_path LIKE ?1 || '/%'",
            params![path],
        )?;
        self.conn.execute(
            "DELETE FROM attrs WHERE group_path = ?1 OR group_path LIKE ?1 || '/%'",
            params![path],
        )?;
        self.conn.execute(
            "DELETE FROM groups WHERE path = ?1 OR path LIKE ?1 || '/%'",
            params![path],
        )?;
        Ok(())
    }

    pub fn has_group(&self, path: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM groups WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Names of the direct children of `parent`, sorted lexicographically.
    pub fn child_groups(&self, parent: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT path FROM groups
             WHERE path LIKE ?1 || '/%' AND path NOT LIKE ?1 || '/%/%'
             ORDER BY path",
        )?;
        let names = stmt
            .query_map(params![parent], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|p| p[parent.len() + 1..].to_string())
            .collect();
        Ok(names)
    }

    pub fn set_attr_i64(&self, group: &str, name: &str, value: i64) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO attrs (group_path, name, kind, int_value) VALUES (?1, ?2, 'int', ?3)",
            params![group, name, value],
        )?;
        Ok(())
    }

    pub fn set_attr_f64(&self, group: &str, name: &str, value: f64) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO attrs (group_path, name, kind, float_value) VALUES (?1, ?2, 'float', ?3)",
            params![group, name, value],
        )?;
        Ok(())
    }

    pub fn set_attr_text(&self, group: &str, name: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO attrs (group_path, name, kind, text_value) VALUES (?1, ?2, 'text', ?3)",
            params![group, name, value],
        )?;
        Ok(())
    }

    fn attr_row(
        &self,
        group: &str,
        name: &str,
    ) -> Result<Option<(String, Option<i64>, Option<f64>, Option<String>)>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT kind, int_value, float_value, text_value FROM attrs
                 WHERE group_path = ?1 AND name = ?2",
                params![group, name],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        Ok(row)
    }

    pub fn attr_i64_opt(&self, group: &str, name: &str) -> Result<Option<i64>, StoreError> {
        match self.attr_row(group, name)? {
            None => Ok(None),
            Some((kind, int_value, _, _)) if kind == "int" => {
                int_value.map(Some).ok_or_else(|| {
                    StoreError::Corrupt(format!("int attribute '{}' has no value", name))
                })
            }
            Some((kind, _, _, _)) => Err(StoreError::DtypeMismatch {
                name: name.to_string(),
                expected: "int",
                actual: kind,
            }),
        }
    }

    pub fn attr_i64(&self, group: &str, name: &str) -> Result<i64, StoreError> {
        self.attr_i64_opt(group, name)?
            .ok_or_else(|| StoreError::AbsentAttr {
                group: group.to_string(),
                name: name.to_string(),
            })
    }

    pub fn attr_f64_opt(&self, group: &str, name: &str) -> Result<Option<f64>, StoreError> {
        match self.attr_row(group, name)? {
            None => Ok(None),
            Some((kind, _, float_value, _)) if kind == "float" => {
                float_value.map(Some).ok_or_else(|| {
                    StoreError::Corrupt(format!("float attribute '{}' has no value", name))
                })
            }
            Some((kind, _, _, _)) => Err(StoreError::DtypeMismatch {
                name: name.to_string(),
                expected: "float",
                actual: kind,
            }),
        }
    }

    pub fn attr_f64(&self, group: &str, name: &str) -> Result<f64, StoreError> {
        self.attr_f64_opt(group, name)?
            .ok_or_else(|| StoreError::AbsentAttr {
                group: group.to_string(),
                name: name.to_string(),
            })
    }

    pub fn attr_text_opt(&self, group: &str, name: &str) -> Result<Option<String>, StoreError> {
        match self.attr_row(group, name)? {
            None => Ok(None),
            Some((kind, _, _, text_value)) if kind == "text" => {
                text_value.map(Some).ok_or_else(|| {
                    StoreError::Corrupt(format!("text attribute '{}' has no value", name))
                })
            }
            Some((kind, _, _, _)) => Err(StoreError::DtypeMismatch {
                name: name.to_string(),
                expected: "text",
                actual: kind,
            }),
        }
    }

    /// Write a dataset, replacing any existing one of the same name.
    pub fn write_dataset(
        &self,
        group: &str,
        name: &str,
        data: &FieldArray,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO datasets (group_path, name, dtype, data) VALUES (?1, ?2, ?3, ?4)",
            params![group, name, data.dtype(), data.to_le_bytes()],
        )?;
        Ok(())
    }

    pub fn read_dataset(&self, group: &str, name: &str) -> Result<FieldArray, StoreError> {
        let row: Option<(String, Vec<u8>)> = self
            .conn
            .query_row(
                "SELECT dtype, data FROM datasets WHERE group_path = ?1 AND name = ?2",
                params![group, name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((dtype, bytes)) => FieldArray::from_le_bytes(&dtype, &bytes, name),
            None => Err(StoreError::AbsentDataset {
                group: group.to_string(),
                name: name.to_string(),
            }),
        }
    }

    /// Dataset names in a group, sorted lexicographically.
    pub fn dataset_names(&self, group: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM datasets WHERE group_path = ?1 ORDER BY name")?;
        let names = stmt
            .query_map(params![group], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Persist the container to a file using VACUUM INTO.
    pub fn save_to(&self, path: &str) -> Result<(), StoreError> {
        // Remove any existing target file so VACUUM INTO can create it cleanly.
        let _ = std::fs::remove_file(path);
        let safe_path = path.replace('\'', "''");
        self.conn
            .execute_batch(&format!("VACUUM INTO '{}'", safe_path))?;
        Ok(())
    }
}
