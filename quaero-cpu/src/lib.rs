//! CPU reference backend for Quaero.
//!
//! Host implementations of every search primitive: log-softmax,
//! arg-max, the two-stage top-K reduction, repetition penalty,
//! broadcast-add, and the sequence append/gather ops. Intended for
//! testing and for machines without an accelerator; not optimised for
//! throughput. Every op runs to completion before returning, so the
//! synchronization points of the search core are trivially satisfied.

pub mod ops;
pub mod tensor;

pub use tensor::CpuTensor;

use quaero::backend::Backend;
use quaero::dtype::DType;
use quaero::{Error, Result};

/// Marker type for the CPU backend.
///
/// All op trait impls are on this type. Search code parameterised by
/// `B: SearchBackend` can use `CpuBackend` to run on the host.
pub struct CpuBackend;

impl Backend for CpuBackend {
    type Tensor = CpuTensor;

    fn alloc_zeros(shape: &[usize], dtype: DType) -> Result<CpuTensor> {
        Ok(CpuTensor::zeros(shape, dtype))
    }

    fn from_f32(shape: &[usize], data: &[f32]) -> Result<CpuTensor> {
        let numel: usize = shape.iter().product();
        if data.len() != numel {
            return Err(Error::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(CpuTensor::from_f32(shape, data))
    }

    fn from_u32(shape: &[usize], data: &[u32]) -> Result<CpuTensor> {
        let numel: usize = shape.iter().product();
        if data.len() != numel {
            return Err(Error::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(CpuTensor::from_u32(shape, data))
    }
}
