//! Helpers over ordered sets of weight matrices, one matrix per layer transition.

use ndarray::Array2;
use rand::Rng;

use crate::{MlErr, Result};

/// The shape of every matrix of the set.
pub fn shapes(matrices: &[Array2<f32>]) -> Vec<(usize, usize)> {
    matrices.iter().map(Array2::dim).collect()
}

/// Checks that `matrices` has exactly the given shapes.
///
/// # Arguments
/// * `matrices` - The matrix set to check.
/// * `expected` - The expected shape of each matrix.
///
/// # Returns
/// An error naming the first mismatch found.
pub fn check_shapes(matrices: &[Array2<f32>], expected: &[(usize, usize)]) -> Result<()> {
    if matrices.len() != expected.len() {
        return Err(MlErr::SizeMismatch {
            what: "matrix set",
            got: matrices.len(),
            expected: expected.len(),
        });
    }

    for (index, (matrix, &dim)) in matrices.iter().zip(expected).enumerate() {
        if matrix.dim() != dim {
            return Err(MlErr::ShapeMismatch {
                index,
                got: matrix.dim(),
                expected: dim,
            });
        }
    }

    Ok(())
}

pub fn zeros(dims: &[(usize, usize)]) -> Vec<Array2<f32>> {
    dims.iter().map(|&dim| Array2::zeros(dim)).collect()
}

/// Creates a matrix set with every weight drawn uniformly from `[-0.5, 0.5)`.
pub fn random<R: Rng>(dims: &[(usize, usize)], rng: &mut R) -> Vec<Array2<f32>> {
    dims.iter()
        .map(|&dim| Array2::from_shape_fn(dim, |_| rng.random_range(-0.5..0.5)))
        .collect()
}

/// Adds `other` into `acc` elementwise, both sets must have the same shapes.
pub fn add_assign(acc: &mut [Array2<f32>], other: &[Array2<f32>]) -> Result<()> {
    check_shapes(other, &shapes(acc))?;

    for (a, o) in acc.iter_mut().zip(other) {
        *a += o;
    }

    Ok(())
}

/// Divides every element of the set by `divisor`.
pub fn divide(matrices: &mut [Array2<f32>], divisor: f32) {
    for m in matrices {
        m.mapv_inplace(|x| x / divisor);
    }
}
