use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("no such group: {0}")]
    AbsentGroup(String),

    #[error("group already exists: {0}")]
    GroupExists(String),

    #[error("no attribute '{name}' on group '{group}'")]
    AbsentAttr { group: String, name: String },

    #[error("no dataset '{name}' in group '{group}'")]
    AbsentDataset { group: String, name: String },

    #[error("'{name}' is {actual}, expected {expected}")]
    DtypeMismatch {
        name: String,
        expected: &'static str,
        actual: String,
    },

    #[error("field '{field}' has {actual} values, expected {expected}")]
    FieldLength {
        field: String,
        expected: usize,
        actual: usize,
    },

    #[error("corrupt container: {0}")]
    Corrupt(String),
}
