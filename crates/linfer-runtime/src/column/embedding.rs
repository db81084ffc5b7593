use super::{CategoricalColumn, ColumnId, InputCache};
use linfer_core::error::{Error, Result};
use linfer_core::math::{broadcast_multiply, inner_size, sum_inner_axes};
use linfer_core::{Snapshot, Tensor};
use ndarray::{ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// How a bag of embedding vectors is reduced to one vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combiner {
    Sum,
    Mean,
    SqrtN,
}

impl FromStr for Combiner {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Ok(Combiner::Sum),
            "mean" => Ok(Combiner::Mean),
            "sqrtn" => Ok(Combiner::SqrtN),
            _ => Err(Error::InvalidCombiner(s.to_string())),
        }
    }
}

impl fmt::Display for Combiner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Combiner::Sum => "sum",
            Combiner::Mean => "mean",
            Combiner::SqrtN => "sqrtn",
        };
        f.write_str(s)
    }
}

/// Dense column looking up (and pooling) embeddings for the ids of a
/// categorical column.
///
/// The embedding table is the snapshot tensor named after the wrapped
/// column. Ids of shape `[batch]` give `[batch, dim]` directly; any deeper
/// id tensor is a bag per example and is pooled back to `[batch, dim]`.
#[derive(Debug, Clone)]
pub struct EmbeddingColumn {
    id: ColumnId,
    categorical: Arc<CategoricalColumn>,
    weight: Option<String>,
    dim: usize,
    combiner: Combiner,
}

impl EmbeddingColumn {
    pub fn new(
        categorical: Arc<CategoricalColumn>,
        weight: Option<String>,
        dim: usize,
        combiner: Combiner,
    ) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidConfig(format!(
                "{}: embedding dimension must be > 0",
                categorical.name()
            )));
        }
        let weight = weight.filter(|w| !w.is_empty());
        Ok(Self { id: ColumnId::next(), categorical, weight, dim, combiner })
    }

    pub fn id(&self) -> ColumnId {
        self.id
    }

    pub fn name(&self) -> String {
        format!("{}_embedding", self.categorical.name())
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn combiner(&self) -> Combiner {
        self.combiner
    }

    pub fn weight(&self) -> Option<&str> {
        self.weight.as_deref()
    }

    pub fn categorical(&self) -> &Arc<CategoricalColumn> {
        &self.categorical
    }

    pub fn transform(
        &self,
        snapshot: &Snapshot,
        inputs: &mut InputCache<'_>,
    ) -> Result<Arc<Tensor>> {
        inputs.memoize(self.id, |inputs| {
            let ids = self.categorical.transform(snapshot, inputs)?;
            let ids = ids.expect_i64(self.categorical.name())?;
            let flat: Vec<i64> = ids.iter().copied().collect();

            let rows = snapshot.embedding_lookup(self.categorical.name(), &flat)?;
            if rows.ndim() != 2 || rows.shape()[1] != self.dim {
                return Err(Error::DimensionMismatch {
                    column: self.name(),
                    expected: self.dim,
                    provided: rows.shape().last().copied().unwrap_or(0),
                });
            }

            let mut shape = ids.shape().to_vec();
            shape.push(self.dim);
            let embeddings = rows
                .into_shape_with_order(IxDyn(&shape))
                .map_err(|e| Error::InvalidShape(e.to_string()))?;
            if embeddings.ndim() <= 2 {
                return Ok(Tensor::F32(embeddings));
            }

            let weight = match &self.weight {
                Some(field) => match inputs.raw_opt(field) {
                    Some(raw) => Some(raw.expect_f32(field)?),
                    None => None,
                },
                None => None,
            };
            let pooled = match weight {
                Some(weight) => weighted_pooling(&embeddings, weight, self.combiner),
                None => pooling(&embeddings, self.combiner),
            };
            pooled.map(Tensor::F32).map_err(|e| match e {
                Error::InvalidShape(msg) => {
                    Error::InvalidShape(format!("{}: {}", self.name(), msg))
                }
                e => e,
            })
        })
    }
}

fn pooling(embeddings: &ArrayD<f32>, combiner: Combiner) -> Result<ArrayD<f32>> {
    let sum = sum_inner_axes(embeddings);
    let size = inner_size(embeddings.shape());
    if size == 0 && combiner != Combiner::Sum {
        return Err(Error::InvalidShape(format!("{} pooling over an empty bag", combiner)));
    }
    Ok(match combiner {
        Combiner::Sum => sum,
        Combiner::Mean => sum / size as f32,
        Combiner::SqrtN => sum / (size as f32).sqrt(),
    })
}

fn weighted_pooling(
    embeddings: &ArrayD<f32>,
    weight: &ArrayD<f32>,
    combiner: Combiner,
) -> Result<ArrayD<f32>> {
    let sum = sum_inner_axes(&broadcast_multiply(embeddings, weight)?);
    let divisor = match combiner {
        Combiner::Sum => return Ok(sum),
        Combiner::Mean => sum_trailing_axes(weight),
        Combiner::SqrtN => sum_trailing_axes(&weight.mapv(|w| w * w)).mapv(f32::sqrt),
    };
    // an empty bag or all-zero weights leave nothing to normalize by
    if let Some(row) = divisor.iter().position(|&d| d == 0.0) {
        return Err(Error::InvalidShape(format!(
            "{} pooling of row {} has zero total weight",
            combiner, row
        )));
    }
    Ok(sum / &divisor.insert_axis(Axis(1)))
}

/// `[batch, ..]` summed down to `[batch]`
fn sum_trailing_axes(a: &ArrayD<f32>) -> ArrayD<f32> {
    let mut out = a.clone();
    for axis in (1..a.ndim()).rev() {
        out = out.sum_axis(Axis(axis));
    }
    out
}
