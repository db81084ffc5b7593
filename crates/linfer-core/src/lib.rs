//! Core primitives for linfer
//!
//! This crate provides the building blocks of the inference engine:
//! - Dense tensor values over `ndarray`
//! - The versioned snapshot file format (reader and writer)
//! - The parameter store built from one snapshot file
//! - Shared error types

pub mod error;
pub mod formats;
pub mod math;
pub mod snapshot;
pub mod tensor;

mod protos {
    include!(concat!(env!("OUT_DIR"), "/snapshot-protos/mod.rs"));
}

pub use error::{Error, Result};
pub use formats::{FieldIndex, SectionStats, SnapshotParser, SnapshotWriter};
pub use snapshot::Snapshot;
pub use tensor::{DataType, Tensor};

/// Core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
