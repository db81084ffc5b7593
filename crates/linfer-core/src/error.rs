use std::path::PathBuf;

use thiserror::Error;

use crate::tensor::DataType;

/// Core error types for linfer
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Snapshot format errors. Fatal to one load attempt only.
    #[error("invalid footer length: expected {expected} bytes, got {actual}")]
    FooterLength { expected: usize, actual: usize },

    #[error("invalid header length: expected {expected} bytes, got {actual}")]
    HeaderLength { expected: usize, actual: usize },

    #[error("invalid data length: expected {expected} bytes, got {actual}")]
    DataLength { expected: usize, actual: usize },

    #[error("invalid index length: expected {expected} bytes, got {actual}")]
    IndexLength { expected: usize, actual: usize },

    #[error("invalid magic number: {0:?}")]
    InvalidMagic(Vec<u8>),

    #[error("invalid offsets: data={data_offset}, index={index_offset}, footer={footer_offset}")]
    InvalidOffsets { data_offset: u64, index_offset: u64, footer_offset: u64 },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    // Request-time errors. Scoped to a single prediction.
    #[error("Field {0} not found")]
    FieldNotFound(String),

    #[error("Field {field}: expected type {expected:?}, but provided is {provided:?}")]
    FieldType { field: String, expected: DataType, provided: DataType },

    #[error("expected same batch size: field {field} has {found}, expected {expected}")]
    BatchMismatch { field: String, expected: usize, found: usize },

    #[error("Invalid tensor shape: {0}")]
    InvalidShape(String),

    #[error("Field {field}: default feature {feature} is not in the index table")]
    DefaultFeatureMissing { field: String, feature: String },

    #[error("Field {field}: id {id} out of range [0, {bound})")]
    IdOutOfRange { field: String, id: i64, bound: usize },

    #[error("model {0} has no loaded snapshot")]
    NotLoaded(String),

    // Registry errors.
    #[error("[{field}] cannot find {name}")]
    NotFound { field: &'static str, name: String },

    #[error("Duplicated {0}")]
    Duplicated(String),

    #[error("[{field}] {name} is unregistered")]
    Unregistered { field: &'static str, name: String },

    #[error("must register before serving launched")]
    RegisterAfterLaunch,

    #[error("No files in dir {}", .0.display())]
    EmptyDir(PathBuf),

    #[error("Not Match, expected: {expected}, but provided: {provided}")]
    NotMatch { expected: String, provided: String },

    // Configuration defects.
    #[error("invalid combiner: {0}")]
    InvalidCombiner(String),

    #[error("units expected dimension is {expected}, but {column} provided is {provided}")]
    DimensionMismatch { column: String, expected: usize, provided: usize },

    #[error("output tensor is empty")]
    EmptyColumns,

    #[error("Invalid boundaries for {field}: {reason}")]
    InvalidBoundaries { field: String, reason: String },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether the error came from parsing a snapshot file.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Error::FooterLength { .. }
                | Error::HeaderLength { .. }
                | Error::DataLength { .. }
                | Error::IndexLength { .. }
                | Error::InvalidMagic(_)
                | Error::InvalidOffsets { .. }
                | Error::Decode(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
