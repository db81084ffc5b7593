//! Layers combining dense column outputs

use crate::column::{EmbeddingColumn, InputCache};
use linfer_core::error::{Error, Result};
use linfer_core::{Snapshot, Tensor};
use ndarray::{concatenate, stack, ArrayD, ArrayViewD, Axis};
use std::sync::Arc;

fn sort_by_name(mut columns: Vec<EmbeddingColumn>) -> Vec<EmbeddingColumn> {
    columns.sort_by_cached_key(|c| c.name());
    columns
}

fn transform_all(
    columns: &[EmbeddingColumn],
    snapshot: &Snapshot,
    inputs: &mut InputCache<'_>,
) -> Result<Vec<Arc<Tensor>>> {
    if columns.is_empty() {
        return Err(Error::EmptyColumns);
    }
    columns.iter().map(|c| c.transform(snapshot, inputs)).collect()
}

fn float_views<'t>(
    columns: &[EmbeddingColumn],
    outputs: &'t [Arc<Tensor>],
) -> Result<Vec<ArrayViewD<'t, f32>>> {
    columns
        .iter()
        .zip(outputs)
        .map(|(c, t)| Ok(t.expect_f32(&c.name())?.view()))
        .collect()
}

/// Concatenates every column output along the feature axis
#[derive(Debug, Clone)]
pub struct InputLayer {
    columns: Vec<EmbeddingColumn>,
}

impl InputLayer {
    pub fn new(columns: Vec<EmbeddingColumn>) -> Self {
        Self { columns: sort_by_name(columns) }
    }

    pub fn columns(&self) -> &[EmbeddingColumn] {
        &self.columns
    }

    /// Output width: the sum of column dimensions
    pub fn units(&self) -> usize {
        self.columns.iter().map(EmbeddingColumn::dimension).sum()
    }

    pub fn call(&self, snapshot: &Snapshot, inputs: &mut InputCache<'_>) -> Result<ArrayD<f32>> {
        let outputs = transform_all(&self.columns, snapshot, inputs)?;
        let views = float_views(&self.columns, &outputs)?;
        concatenate(Axis(1), &views).map_err(|e| Error::InvalidShape(e.to_string()))
    }
}

/// Sums the `[batch, units]` outputs of its columns elementwise.
///
/// Each column holds the per-feature weights of a linear model, so the sum
/// is the logit.
#[derive(Debug, Clone)]
pub struct LinearModelLayer {
    units: usize,
    columns: Vec<EmbeddingColumn>,
}

impl LinearModelLayer {
    pub fn new(units: usize, columns: Vec<EmbeddingColumn>) -> Result<Self> {
        if let Some(c) = columns.iter().find(|c| c.dimension() != units) {
            return Err(Error::DimensionMismatch {
                column: c.name(),
                expected: units,
                provided: c.dimension(),
            });
        }
        Ok(Self { units, columns: sort_by_name(columns) })
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn columns(&self) -> &[EmbeddingColumn] {
        &self.columns
    }

    pub fn call(&self, snapshot: &Snapshot, inputs: &mut InputCache<'_>) -> Result<ArrayD<f32>> {
        let outputs = transform_all(&self.columns, snapshot, inputs)?;
        let views = float_views(&self.columns, &outputs)?;
        let stacked = stack(Axis(2), &views).map_err(|e| Error::InvalidShape(e.to_string()))?;
        Ok(stacked.sum_axis(Axis(2)))
    }
}
