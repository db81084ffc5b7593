//! linfer runtime
//!
//! Feature columns, linear models and the hot-reloading model registry
//! built on the snapshot format of `linfer-core`.

pub mod column;
mod config;
pub mod layer;
pub mod model;
mod registry;
pub mod watcher;

pub use column::{
    BucketizedColumn, CategoricalColumn, ColumnId, Combiner, EmbeddingColumn, FeatureColumn,
    Features, IdentityColumn, InputCache,
};
pub use config::RegistryConfig;
pub use layer::{InputLayer, LinearModelLayer};
pub use model::{LogisticRegression, Model};
pub use registry::{latest_snapshot_file, ModelConfig, ModelRegistry, ServingModel};

pub use linfer_core::{Error, Result, Snapshot, SnapshotWriter, Tensor};

/// Runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
