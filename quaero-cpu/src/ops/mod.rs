//! CPU implementations of the search op traits.

pub mod score;
pub mod select;
pub mod sequence;

use quaero::tensor::Tensor;
use quaero::{DType, Error, Result};

use crate::tensor::CpuTensor;

/// Check that `t` is a 2-D matrix of `dtype` and return `(rows, cols)`.
pub(crate) fn matrix_dims(t: &CpuTensor, dtype: DType) -> Result<(usize, usize)> {
    if t.dtype() != dtype {
        return Err(Error::DtypeMismatch {
            expected: dtype.to_string(),
            got: t.dtype().to_string(),
        });
    }
    match *t.shape() {
        [rows, cols] => Ok((rows, cols)),
        _ => Err(Error::ShapeMismatch {
            expected: vec![0, 0],
            got: t.shape().to_vec(),
        }),
    }
}
