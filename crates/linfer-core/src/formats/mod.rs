pub mod snapshot;
pub mod writer;

pub use snapshot::{FieldIndex, SectionStats, SnapshotParser};
pub use writer::SnapshotWriter;
