use std::sync::Arc;

use crate::backend::{Backend, TensorImpl};
use crate::dtype::{DType, Element};
use crate::error::{Result, TensorError};
use crate::shape::Shape;

/// A handle to a tensor living on some backend.
///
/// Cloning the handle shares the same backend tensor; the memory is released
/// when the last clone is dropped. Use [`Tensor::copy`] for an independent
/// duplicate.
#[derive(Debug, Clone)]
pub struct Tensor {
    pimpl: Arc<dyn TensorImpl>,
}

impl Tensor {
    /// Allocate an uninitialized tensor on `backend`.
    pub fn new(backend: &dyn Backend, shape: impl Into<Shape>, dtype: DType) -> Result<Self> {
        let shape = shape.into();
        backend
            .create_tensor(&shape, dtype, None)
            .map(Tensor::from_impl)
    }

    /// Create a tensor on `backend` holding a copy of `data`.
    ///
    /// `data.len()` must equal `shape.numel()`.
    pub fn from_slice<T: Element>(
        backend: &dyn Backend,
        data: &[T],
        shape: impl Into<Shape>,
    ) -> Result<Self> {
        let shape = shape.into();
        if shape.checked_numel() != Some(data.len()) {
            return Err(TensorError::ShapeMismatch {
                expected: shape.dims().to_vec(),
                got: vec![data.len()],
            });
        }
        let bytes = T::to_bytes(data);
        backend
            .create_tensor(&shape, T::DTYPE, Some(&bytes))
            .map(Tensor::from_impl)
    }

    /// Wrap a backend tensor.
    pub fn from_impl(pimpl: Arc<dyn TensorImpl>) -> Self {
        Tensor { pimpl }
    }

    /// The backend representation, for passing to [`Backend`] methods.
    pub fn pimpl(&self) -> &dyn TensorImpl {
        self.pimpl.as_ref()
    }

    pub fn shape(&self) -> &Shape {
        self.pimpl.shape()
    }

    pub fn dtype(&self) -> DType {
        self.pimpl.dtype()
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.pimpl.size()
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        self.pimpl.backend()
    }

    /// True if both handles refer to the same backend tensor.
    pub fn same_handle(&self, other: &Tensor) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.pimpl) as *const (),
            Arc::as_ptr(&other.pimpl) as *const (),
        )
    }

    /// Read the raw device bytes back to the host. Blocks.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; self.pimpl.byte_size()];
        self.backend().copy_to_host(self.pimpl(), &mut bytes)?;
        Ok(bytes)
    }

    /// Read the tensor back as host values. `T` must match the tensor dtype.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if self.dtype() != T::DTYPE {
            return Err(TensorError::DTypeMismatch {
                expected: T::DTYPE.to_string(),
                got: self.dtype().to_string(),
            });
        }
        Ok(T::from_bytes(&self.to_bytes()?))
    }

    /// Independent device-side copy.
    pub fn copy(&self) -> Result<Tensor> {
        self.backend().copy(self.pimpl()).map(Tensor::from_impl)
    }

    /// Convert into a new tensor of `dtype`.
    pub fn cast(&self, dtype: DType) -> Result<Tensor> {
        self.backend().cast(self.pimpl(), dtype).map(Tensor::from_impl)
    }
}
