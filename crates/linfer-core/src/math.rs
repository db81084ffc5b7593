//! Small dense-math helpers over `ndarray`

use crate::error::{Error, Result};
use ndarray::{ArrayD, Axis};

/// Elementwise logistic function `1 / (1 + e^-x)`
pub fn sigmoid(logit: &ArrayD<f32>) -> ArrayD<f32> {
    logit.mapv(|x| 1.0 / (1.0 + (-x).exp()))
}

/// Multiply `a` by `b`, broadcasting `b` over the trailing axis of `a`.
///
/// `b` must have exactly one dimension less than `a`, and match the
/// leading dimensions of `a`.
pub fn broadcast_multiply(a: &ArrayD<f32>, b: &ArrayD<f32>) -> Result<ArrayD<f32>> {
    if a.ndim() != b.ndim() + 1 || &a.shape()[..b.ndim()] != b.shape() {
        return Err(Error::InvalidShape(format!(
            "cannot broadcast {:?} over trailing axis of {:?}",
            b.shape(),
            a.shape()
        )));
    }
    let b = b.view().insert_axis(Axis(b.ndim()));
    Ok(a * &b)
}

/// Sum over every axis strictly between the leading and trailing axes.
///
/// `[batch, d1, .., dk, dim]` becomes `[batch, dim]`. Arrays of rank two
/// or less are returned unchanged.
pub fn sum_inner_axes(a: &ArrayD<f32>) -> ArrayD<f32> {
    let mut out = a.clone();
    // reduce from the innermost so earlier axis numbers stay valid
    for axis in (1..a.ndim().saturating_sub(1)).rev() {
        out = out.sum_axis(Axis(axis));
    }
    out
}

/// Number of elements across the inner axes of a shape (the bag size)
pub fn inner_size(shape: &[usize]) -> usize {
    if shape.len() <= 2 {
        return 1;
    }
    shape[1..shape.len() - 1].iter().product()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    fn arr(shape: &[usize], v: Vec<f32>) -> ArrayD<f32> {
        ArrayD::from_shape_vec(IxDyn(shape), v).unwrap()
    }

    #[test]
    fn test_sigmoid() {
        let out = sigmoid(&arr(&[3], vec![0.0, 2.0, -2.0]));
        assert!((out[[0]] - 0.5).abs() < 1e-6);
        assert!((out[[1]] - 0.880_797).abs() < 1e-5);
        assert!((out[[1]] + out[[2]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_broadcast_multiply() {
        let a = arr(&[2, 2, 3], (1..=12).map(|x| x as f32).collect());
        let b = arr(&[2, 2], vec![1.0, 0.0, 2.0, -1.0]);
        let out = broadcast_multiply(&a, &b).unwrap();
        assert_eq!(out.shape(), &[2, 2, 3]);
        let values: Vec<f32> = out.iter().copied().collect();
        assert_eq!(
            values,
            vec![1., 2., 3., 0., 0., 0., 14., 16., 18., -10., -11., -12.]
        );
    }

    #[test]
    fn test_broadcast_multiply_shape_mismatch() {
        let a = arr(&[2, 3], vec![0.0; 6]);
        assert!(broadcast_multiply(&a, &arr(&[3], vec![0.0; 3])).is_err());
        assert!(broadcast_multiply(&a, &arr(&[2, 3], vec![0.0; 6])).is_err());
    }

    #[test]
    fn test_sum_inner_axes() {
        let a = arr(&[1, 2, 2, 1], vec![1.0, 2.0, 3.0, 4.0]);
        let out = sum_inner_axes(&a);
        assert_eq!(out.shape(), &[1, 1]);
        assert_eq!(out[[0, 0]], 10.0);
        assert_eq!(inner_size(a.shape()), 4);

        let flat = arr(&[2, 3], vec![1.0; 6]);
        assert_eq!(sum_inner_axes(&flat), flat);
        assert_eq!(inner_size(flat.shape()), 1);
    }
}
