use crate::error::{Error, Result};
use ndarray::{ArrayD, IxDyn};

/// Tensor element type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    F32,
    I64,
    /// UTF-8 strings (raw categorical features)
    Str,
}

/// Dense N-dimensional tensor over one of the supported element types.
///
/// Raw request features, snapshot parameters, categorical ids and model
/// outputs all travel as `Tensor`.
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    F32(ArrayD<f32>),
    I64(ArrayD<i64>),
    Str(ArrayD<String>),
}

impl Tensor {
    pub fn from_f32(shape: &[usize], values: Vec<f32>) -> Result<Self> {
        Ok(Tensor::F32(build(shape, values)?))
    }

    pub fn from_i64(shape: &[usize], values: Vec<i64>) -> Result<Self> {
        Ok(Tensor::I64(build(shape, values)?))
    }

    pub fn from_strings<S: Into<String>>(shape: &[usize], values: Vec<S>) -> Result<Self> {
        let values = values.into_iter().map(Into::into).collect();
        Ok(Tensor::Str(build(shape, values)?))
    }

    pub fn dtype(&self) -> DataType {
        match self {
            Tensor::F32(_) => DataType::F32,
            Tensor::I64(_) => DataType::I64,
            Tensor::Str(_) => DataType::Str,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Tensor::F32(a) => a.shape(),
            Tensor::I64(a) => a.shape(),
            Tensor::Str(a) => a.shape(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Leading (batch) dimension, `None` for scalars
    pub fn batch_size(&self) -> Option<usize> {
        self.shape().first().copied()
    }

    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match self {
            Tensor::F32(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<&ArrayD<i64>> {
        match self {
            Tensor::I64(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&ArrayD<String>> {
        match self {
            Tensor::Str(a) => Some(a),
            _ => None,
        }
    }

    /// Borrow as `f32`, or fail with a type error naming `field`
    pub fn expect_f32(&self, field: &str) -> Result<&ArrayD<f32>> {
        self.as_f32().ok_or_else(|| self.type_error(field, DataType::F32))
    }

    pub fn expect_i64(&self, field: &str) -> Result<&ArrayD<i64>> {
        self.as_i64().ok_or_else(|| self.type_error(field, DataType::I64))
    }

    pub fn expect_str(&self, field: &str) -> Result<&ArrayD<String>> {
        self.as_str().ok_or_else(|| self.type_error(field, DataType::Str))
    }

    fn type_error(&self, field: &str, expected: DataType) -> Error {
        Error::FieldType { field: field.to_string(), expected, provided: self.dtype() }
    }
}

fn build<T>(shape: &[usize], values: Vec<T>) -> Result<ArrayD<T>> {
    let numel = shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| Error::InvalidShape(format!("shape {:?} overflows usize", shape)))?;
    if numel != values.len() {
        return Err(Error::InvalidShape(format!(
            "shape {:?} holds {} elements, got {}",
            shape,
            numel,
            values.len()
        )));
    }
    ArrayD::from_shape_vec(IxDyn(shape), values).map_err(|e| Error::InvalidShape(e.to_string()))
}

impl From<ArrayD<f32>> for Tensor {
    fn from(a: ArrayD<f32>) -> Self {
        Tensor::F32(a)
    }
}

impl From<ArrayD<i64>> for Tensor {
    fn from(a: ArrayD<i64>) -> Self {
        Tensor::I64(a)
    }
}

impl From<ArrayD<String>> for Tensor {
    fn from(a: ArrayD<String>) -> Self {
        Tensor::Str(a)
    }
}
