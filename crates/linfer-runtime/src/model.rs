//! Models served by the registry

use crate::column::{EmbeddingColumn, Features, InputCache};
use crate::layer::LinearModelLayer;
use linfer_core::error::Result;
use linfer_core::math::sigmoid;
use linfer_core::{Snapshot, Tensor};
use ndarray::ArrayD;

/// A prediction function over one snapshot.
///
/// Implementations hold no per-request state; the registry calls
/// `predict` concurrently from any number of requests.
pub trait Model: Send + Sync {
    fn name(&self) -> &str;

    fn predict(&self, snapshot: &Snapshot, features: &Features) -> Result<Tensor>;
}

/// Sigmoid over a linear combination of embedding weights
#[derive(Debug, Clone)]
pub struct LogisticRegression {
    name: String,
    layer: LinearModelLayer,
}

impl LogisticRegression {
    pub fn new(
        name: impl Into<String>,
        units: usize,
        columns: Vec<EmbeddingColumn>,
    ) -> Result<Self> {
        Ok(Self { name: name.into(), layer: LinearModelLayer::new(units, columns)? })
    }

    pub fn layer(&self) -> &LinearModelLayer {
        &self.layer
    }

    /// Raw logits computed through an existing cache
    pub fn logits(&self, snapshot: &Snapshot, inputs: &mut InputCache<'_>) -> Result<ArrayD<f32>> {
        self.layer.call(snapshot, inputs)
    }
}

impl Model for LogisticRegression {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, snapshot: &Snapshot, features: &Features) -> Result<Tensor> {
        let mut inputs = InputCache::new(features)?;
        let logit = self.logits(snapshot, &mut inputs)?;
        Ok(Tensor::F32(sigmoid(&logit)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{CategoricalColumn, Combiner, IdentityColumn};
    use linfer_core::{Error, SnapshotWriter};
    use std::sync::Arc;

    fn snapshot() -> Snapshot {
        let weights = Tensor::from_f32(&[3, 1], vec![0.0, 2.0, -2.0]).unwrap();
        let bytes = SnapshotWriter::new("lr", 1)
            .add_tensor("F1", &weights)
            .add_field_index("F1", 1, [("zero", 0), ("pos", 1), ("neg", 2)])
            .encode()
            .unwrap();
        Snapshot::from_bytes(&bytes).unwrap()
    }

    fn model() -> LogisticRegression {
        let base: Arc<CategoricalColumn> =
            Arc::new(IdentityColumn::new("F1", "zero", 3).unwrap().into());
        let emb = EmbeddingColumn::new(base, None, 1, Combiner::Sum).unwrap();
        LogisticRegression::new("lr", 1, vec![emb]).unwrap()
    }

    #[test]
    fn test_predict() {
        let mut features = Features::new();
        features.insert(
            "F1".into(),
            Tensor::from_strings(&[3], vec!["zero", "pos", "missing"]).unwrap(),
        );
        let out = model().predict(&snapshot(), &features).unwrap();
        assert_eq!(out.shape(), &[3, 1]);
        let p = out.as_f32().unwrap();
        assert!((p[[0, 0]] - 0.5).abs() < 1e-6);
        assert!((p[[1, 0]] - 0.880_797).abs() < 1e-5);
        assert!((p[[2, 0]] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_predict_batch_mismatch() {
        let mut features = Features::new();
        features.insert("F1".into(), Tensor::from_strings(&[2], vec!["pos", "neg"]).unwrap());
        features.insert("F2".into(), Tensor::from_f32(&[3], vec![0.0; 3]).unwrap());
        assert!(matches!(
            model().predict(&snapshot(), &features),
            Err(Error::BatchMismatch { .. })
        ));
    }

    #[test]
    fn test_predict_missing_field() {
        let features = Features::new();
        assert!(matches!(
            model().predict(&snapshot(), &features),
            Err(Error::FieldNotFound(_))
        ));
    }
}
