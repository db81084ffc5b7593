use super::{ColumnId, InputCache};
use linfer_core::error::{Error, Result};
use linfer_core::{Snapshot, Tensor};
use ndarray::ArrayD;
use std::sync::Arc;

/// Maps raw feature strings to ids through the snapshot's index table
#[derive(Debug, Clone)]
pub struct IdentityColumn {
    id: ColumnId,
    field: String,
    default_feature: String,
    num_buckets: usize,
}

impl IdentityColumn {
    pub fn new(
        field: impl Into<String>,
        default_feature: impl Into<String>,
        num_buckets: usize,
    ) -> Result<Self> {
        let field = field.into();
        let default_feature = default_feature.into();
        if field.is_empty() {
            return Err(Error::InvalidConfig("identity column needs a field name".into()));
        }
        if default_feature.is_empty() {
            return Err(Error::InvalidConfig(format!("{}: default feature is required", field)));
        }
        if num_buckets == 0 {
            return Err(Error::InvalidConfig(format!("{}: num_buckets must be > 0", field)));
        }
        Ok(Self { id: ColumnId::next(), field, default_feature, num_buckets })
    }

    pub fn id(&self) -> ColumnId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.field
    }

    pub fn default_feature(&self) -> &str {
        &self.default_feature
    }

    pub fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    pub fn transform(
        &self,
        snapshot: &Snapshot,
        inputs: &mut InputCache<'_>,
    ) -> Result<Arc<Tensor>> {
        inputs.memoize(self.id, |inputs| {
            let raw = inputs.raw(&self.field)?.expect_str(&self.field)?;
            let ids = snapshot.index_lookup(
                &self.field,
                &self.default_feature,
                raw.iter().map(String::as_str),
            )?;
            if let Some(&id) = ids.iter().find(|&&id| id < 0 || id as usize >= self.num_buckets) {
                return Err(Error::IdOutOfRange {
                    field: self.field.clone(),
                    id,
                    bound: self.num_buckets,
                });
            }
            let ids = ArrayD::from_shape_vec(raw.raw_dim(), ids)
                .map_err(|e| Error::InvalidShape(e.to_string()))?;
            Ok(Tensor::I64(ids))
        })
    }
}

/// Maps continuous values to bucket ids.
///
/// `k` sorted boundaries split the line into `k + 1` half-open buckets:
/// `(-inf, b0)`, `[b0, b1)`, .., `[b(k-1), +inf)`.
#[derive(Debug, Clone)]
pub struct BucketizedColumn {
    id: ColumnId,
    field: String,
    default_value: f32,
    omitted_value: f32,
    boundaries: Vec<f32>,
}

impl BucketizedColumn {
    pub fn new(
        field: impl Into<String>,
        default_value: f32,
        omitted_value: f32,
        boundaries: Vec<f32>,
    ) -> Result<Self> {
        let field = field.into();
        if field.is_empty() {
            return Err(Error::InvalidConfig("bucketized column needs a field name".into()));
        }
        if boundaries.iter().any(|b| b.is_nan()) {
            return Err(Error::InvalidBoundaries { field, reason: "NaN boundary".into() });
        }
        if boundaries.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::InvalidBoundaries { field, reason: "not sorted ascending".into() });
        }
        if default_value == omitted_value {
            return Err(Error::InvalidConfig(format!(
                "{}: default value {} equals omitted value",
                field, default_value
            )));
        }
        Ok(Self { id: ColumnId::next(), field, default_value, omitted_value, boundaries })
    }

    pub fn id(&self) -> ColumnId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.field
    }

    pub fn boundaries(&self) -> &[f32] {
        &self.boundaries
    }

    pub fn num_buckets(&self) -> usize {
        self.boundaries.len() + 1
    }

    /// Bucket of a single value
    pub fn bucketize(&self, value: f32) -> i64 {
        let value = if value == self.omitted_value { self.default_value } else { value };
        self.boundaries.partition_point(|&b| b <= value) as i64
    }

    pub fn transform(
        &self,
        _snapshot: &Snapshot,
        inputs: &mut InputCache<'_>,
    ) -> Result<Arc<Tensor>> {
        inputs.memoize(self.id, |inputs| {
            let raw = inputs.raw(&self.field)?.expect_f32(&self.field)?;
            Ok(Tensor::I64(raw.mapv(|v| self.bucketize(v))))
        })
    }
}
