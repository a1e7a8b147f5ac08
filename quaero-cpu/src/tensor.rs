//! CPU tensor implementation.

use std::sync::Arc;

use quaero::dtype::DType;
use quaero::tensor::Tensor;

/// A host-resident tensor backed by shared byte storage.
///
/// Uses `Arc<Vec<u8>>` so clones are cheap; mutation goes through
/// `Arc::make_mut`, which copies only when the storage is shared.
#[derive(Clone)]
pub struct CpuTensor {
    data: Arc<Vec<u8>>,
    shape: Vec<usize>,
    dtype: DType,
}

impl CpuTensor {
    /// Create a zero-filled tensor.
    #[must_use]
    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        let numel: usize = shape.iter().product();
        Self {
            data: Arc::new(vec![0u8; numel * dtype.size_in_bytes()]),
            shape: shape.to_vec(),
            dtype,
        }
    }

    /// Create a tensor from an f32 slice.
    ///
    /// # Panics
    /// Panics if `data` does not match `shape`.
    #[must_use]
    pub fn from_f32(shape: &[usize], data: &[f32]) -> Self {
        let numel: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            numel,
            "data len {} != shape product {numel}",
            data.len()
        );
        Self {
            data: Arc::new(bytemuck::cast_slice(data).to_vec()),
            shape: shape.to_vec(),
            dtype: DType::F32,
        }
    }

    /// Create a tensor from a u32 slice.
    ///
    /// # Panics
    /// Panics if `data` does not match `shape`.
    #[must_use]
    pub fn from_u32(shape: &[usize], data: &[u32]) -> Self {
        let numel: usize = shape.iter().product();
        assert_eq!(data.len(), numel);
        Self {
            data: Arc::new(bytemuck::cast_slice(data).to_vec()),
            shape: shape.to_vec(),
            dtype: DType::U32,
        }
    }

    /// Get the data as an f32 slice.
    ///
    /// # Panics
    /// Panics if dtype is not F32.
    #[must_use]
    pub fn as_f32_slice(&self) -> &[f32] {
        assert_eq!(self.dtype, DType::F32, "expected F32 tensor");
        bytemuck::cast_slice(&self.data)
    }

    /// Get the data as a mutable f32 slice.
    ///
    /// # Panics
    /// Panics if dtype is not F32.
    pub fn as_f32_slice_mut(&mut self) -> &mut [f32] {
        assert_eq!(self.dtype, DType::F32, "expected F32 tensor");
        bytemuck::cast_slice_mut(Arc::make_mut(&mut self.data).as_mut_slice())
    }

    /// Get the data as a u32 slice.
    ///
    /// # Panics
    /// Panics if dtype is not U32.
    #[must_use]
    pub fn as_u32_slice(&self) -> &[u32] {
        assert_eq!(self.dtype, DType::U32, "expected U32 tensor");
        bytemuck::cast_slice(&self.data)
    }

    /// Get the data as a mutable u32 slice.
    ///
    /// # Panics
    /// Panics if dtype is not U32.
    pub fn as_u32_slice_mut(&mut self) -> &mut [u32] {
        assert_eq!(self.dtype, DType::U32, "expected U32 tensor");
        bytemuck::cast_slice_mut(Arc::make_mut(&mut self.data).as_mut_slice())
    }
}

impl Tensor for CpuTensor {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn dtype(&self) -> DType {
        self.dtype
    }
}
