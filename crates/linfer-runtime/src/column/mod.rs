//! Feature columns
//!
//! A column is an immutable descriptor that turns raw request features
//! (plus the active [`Snapshot`]) into a numeric tensor. Columns carry no
//! per-request state: every output lives in the request's [`InputCache`],
//! keyed by the column's [`ColumnId`].
//!
//! - [`IdentityColumn`]: strings -> ids through the snapshot index table
//! - [`BucketizedColumn`]: floats -> bucket ids through sorted boundaries
//! - [`EmbeddingColumn`]: ids of a categorical column -> pooled embeddings

mod categorical;
mod embedding;
mod inputs;

pub use categorical::{BucketizedColumn, IdentityColumn};
pub use embedding::{Combiner, EmbeddingColumn};
pub use inputs::{Features, InputCache};

use linfer_core::error::Result;
use linfer_core::{Snapshot, Tensor};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Stable identity of one column instance, used as its cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnId(u64);

impl ColumnId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ColumnId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Columns producing integer ids
#[derive(Debug, Clone)]
pub enum CategoricalColumn {
    Identity(IdentityColumn),
    Bucketized(BucketizedColumn),
}

impl CategoricalColumn {
    pub fn id(&self) -> ColumnId {
        match self {
            CategoricalColumn::Identity(c) => c.id(),
            CategoricalColumn::Bucketized(c) => c.id(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CategoricalColumn::Identity(c) => c.name(),
            CategoricalColumn::Bucketized(c) => c.name(),
        }
    }

    pub fn num_buckets(&self) -> usize {
        match self {
            CategoricalColumn::Identity(c) => c.num_buckets(),
            CategoricalColumn::Bucketized(c) => c.num_buckets(),
        }
    }

    /// Id tensor shaped like the raw feature
    pub fn transform(
        &self,
        snapshot: &Snapshot,
        inputs: &mut InputCache<'_>,
    ) -> Result<Arc<Tensor>> {
        match self {
            CategoricalColumn::Identity(c) => c.transform(snapshot, inputs),
            CategoricalColumn::Bucketized(c) => c.transform(snapshot, inputs),
        }
    }
}

impl From<IdentityColumn> for CategoricalColumn {
    fn from(c: IdentityColumn) -> Self {
        CategoricalColumn::Identity(c)
    }
}

impl From<BucketizedColumn> for CategoricalColumn {
    fn from(c: BucketizedColumn) -> Self {
        CategoricalColumn::Bucketized(c)
    }
}

/// Any feature column
#[derive(Debug, Clone)]
pub enum FeatureColumn {
    Identity(IdentityColumn),
    Bucketized(BucketizedColumn),
    Embedding(EmbeddingColumn),
}

impl FeatureColumn {
    pub fn id(&self) -> ColumnId {
        match self {
            FeatureColumn::Identity(c) => c.id(),
            FeatureColumn::Bucketized(c) => c.id(),
            FeatureColumn::Embedding(c) => c.id(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            FeatureColumn::Identity(c) => c.name().to_string(),
            FeatureColumn::Bucketized(c) => c.name().to_string(),
            FeatureColumn::Embedding(c) => c.name(),
        }
    }

    pub fn transform(
        &self,
        snapshot: &Snapshot,
        inputs: &mut InputCache<'_>,
    ) -> Result<Arc<Tensor>> {
        match self {
            FeatureColumn::Identity(c) => c.transform(snapshot, inputs),
            FeatureColumn::Bucketized(c) => c.transform(snapshot, inputs),
            FeatureColumn::Embedding(c) => c.transform(snapshot, inputs),
        }
    }
}

impl From<CategoricalColumn> for FeatureColumn {
    fn from(c: CategoricalColumn) -> Self {
        match c {
            CategoricalColumn::Identity(c) => FeatureColumn::Identity(c),
            CategoricalColumn::Bucketized(c) => FeatureColumn::Bucketized(c),
        }
    }
}

impl From<IdentityColumn> for FeatureColumn {
    fn from(c: IdentityColumn) -> Self {
        FeatureColumn::Identity(c)
    }
}

impl From<BucketizedColumn> for FeatureColumn {
    fn from(c: BucketizedColumn) -> Self {
        FeatureColumn::Bucketized(c)
    }
}

impl From<EmbeddingColumn> for FeatureColumn {
    fn from(c: EmbeddingColumn) -> Self {
        FeatureColumn::Embedding(c)
    }
}
