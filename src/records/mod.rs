mod store;
mod types;


pub use store::{LocsIter, RecordStore, TracksIter};
pub use types::{FieldBundle, RecordMode};
