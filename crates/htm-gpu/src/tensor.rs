use std::any::Any;
use std::fmt;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use htm_tensor::{Backend, DType, Shape, TensorImpl};

use crate::backend::GpuBackend;
use crate::buffer::Buffer;
use crate::driver::Driver;

/// Tensor stored in a device buffer of a [`GpuBackend`].
///
/// The tensor owns its buffer exclusively and hands it back to the backend
/// when dropped.
pub struct GpuTensor<D: Driver> {
    shape: Shape,
    dtype: DType,
    buffer: ManuallyDrop<Buffer<D>>,
    backend: Arc<GpuBackend<D>>,
}

impl<D: Driver> GpuTensor<D> {
    pub(crate) fn new(
        shape: Shape,
        dtype: DType,
        buffer: Buffer<D>,
        backend: Arc<GpuBackend<D>>,
    ) -> Self {
        GpuTensor {
            shape,
            dtype,
            buffer: ManuallyDrop::new(buffer),
            backend,
        }
    }

    pub fn buffer(&self) -> &Buffer<D> {
        &self.buffer
    }

    /// The owning backend.
    pub fn gpu_backend(&self) -> &Arc<GpuBackend<D>> {
        &self.backend
    }
}

impl<D: Driver> Drop for GpuTensor<D> {
    fn drop(&mut self) {
        // SAFETY: `buffer` is never touched again after this point.
        let buffer = unsafe { ManuallyDrop::take(&mut self.buffer) };
        self.backend.context().release(buffer);
    }
}

impl<D: Driver> fmt::Debug for GpuTensor<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuTensor")
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .field("bytes", &self.buffer.len())
            .finish()
    }
}

impl<D: Driver> TensorImpl for GpuTensor<D> {
    fn shape(&self) -> &Shape {
        &self.shape
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
