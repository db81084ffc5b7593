//! Per-request input cache
//!
//! Holds the raw features of one prediction call and every column output
//! computed while serving it. Never shared across requests.

use super::ColumnId;
use linfer_core::error::{Error, Result};
use linfer_core::Tensor;
use std::collections::HashMap;
use std::sync::Arc;

/// Raw request features: field name -> tensor
pub type Features = HashMap<String, Tensor>;

pub struct InputCache<'a> {
    features: &'a Features,
    batch_size: Option<usize>,
    computed: HashMap<ColumnId, Arc<Tensor>>,
    /// How many times each column was actually computed
    transforms: HashMap<ColumnId, usize>,
}

impl<'a> InputCache<'a> {
    /// Seed the cache from raw features.
    ///
    /// Every feature must share the same leading (batch) dimension.
    pub fn new(features: &'a Features) -> Result<Self> {
        let mut names: Vec<&String> = features.keys().collect();
        names.sort_unstable();

        let mut batch_size = None;
        for name in names {
            let found = features[name]
                .batch_size()
                .ok_or_else(|| Error::InvalidShape(format!("feature {} is a scalar", name)))?;
            match batch_size {
                None => batch_size = Some(found),
                Some(expected) if expected != found => {
                    return Err(Error::BatchMismatch { field: name.clone(), expected, found });
                }
                Some(_) => {}
            }
        }

        Ok(Self { features, batch_size, computed: HashMap::new(), transforms: HashMap::new() })
    }

    pub fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }

    /// Raw feature tensor, failing with `FieldNotFound` when absent
    pub fn raw(&self, field: &str) -> Result<&'a Tensor> {
        self.features.get(field).ok_or_else(|| Error::FieldNotFound(field.to_string()))
    }

    pub fn raw_opt(&self, field: &str) -> Option<&'a Tensor> {
        self.features.get(field)
    }

    pub fn get(&self, id: ColumnId) -> Option<Arc<Tensor>> {
        self.computed.get(&id).cloned()
    }

    /// Return the cached output of column `id`, computing it with `compute`
    /// on a miss. A column is computed at most once per cache.
    pub fn memoize<F>(&mut self, id: ColumnId, compute: F) -> Result<Arc<Tensor>>
    where
        F: FnOnce(&mut Self) -> Result<Tensor>,
    {
        if let Some(hit) = self.computed.get(&id) {
            return Ok(Arc::clone(hit));
        }
        let tensor = Arc::new(compute(self)?);
        *self.transforms.entry(id).or_insert(0) += 1;
        self.computed.insert(id, Arc::clone(&tensor));
        Ok(tensor)
    }

    /// Number of times column `id` was computed through this cache
    pub fn transform_count(&self, id: ColumnId) -> usize {
        self.transforms.get(&id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features() -> Features {
        let mut f = Features::new();
        f.insert("F1".into(), Tensor::from_strings(&[2, 3], vec!["a"; 6]).unwrap());
        f.insert("F2".into(), Tensor::from_f32(&[2, 2], vec![1.0; 4]).unwrap());
        f
    }

    #[test]
    fn test_batch_size() {
        let f = features();
        let cache = InputCache::new(&f).unwrap();
        assert_eq!(cache.batch_size(), Some(2));
        assert!(cache.raw("F1").is_ok());
        assert!(matches!(cache.raw("F9").unwrap_err(), Error::FieldNotFound(_)));
    }

    #[test]
    fn test_batch_mismatch() {
        let mut f = features();
        f.insert("F3".into(), Tensor::from_f32(&[3], vec![0.0; 3]).unwrap());
        match InputCache::new(&f) {
            Err(Error::BatchMismatch { field, expected, found }) => {
                assert_eq!(field, "F3");
                assert_eq!(expected, 2);
                assert_eq!(found, 3);
            }
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("batch mismatch accepted"),
        }
    }

    #[test]
    fn test_scalar_feature_rejected() {
        let mut f = Features::new();
        f.insert("s".into(), Tensor::from_f32(&[], vec![1.0]).unwrap());
        assert!(matches!(InputCache::new(&f), Err(Error::InvalidShape(_))));
    }

    #[test]
    fn test_memoize_computes_once() {
        let f = features();
        let mut cache = InputCache::new(&f).unwrap();
        let id = ColumnId::next();
        let mut calls = 0;
        for _ in 0..3 {
            cache
                .memoize(id, |_| {
                    calls += 1;
                    Tensor::from_i64(&[1], vec![7])
                })
                .unwrap();
        }
        assert_eq!(calls, 1);
        assert_eq!(cache.transform_count(id), 1);
        assert_eq!(cache.get(id).unwrap().as_i64().unwrap()[[0]], 7);
    }

    #[test]
    fn test_failed_compute_is_not_cached() {
        let f = features();
        let mut cache = InputCache::new(&f).unwrap();
        let id = ColumnId::next();
        assert!(cache.memoize(id, |c| c.raw("missing").map(|t| t.clone())).is_err());
        assert!(cache.get(id).is_none());
        assert_eq!(cache.transform_count(id), 0);
    }
}
