use std::fmt;
use std::sync::{Arc, Weak};

use htm_tensor::{Backend, DType, Result, Shape, TensorError, TensorImpl};

use crate::buffer::Buffer;
use crate::config::BackendConfig;
use crate::context::{DeviceContext, DeviceInfo};
use crate::dispatch;
use crate::driver::Driver;
use crate::tensor::GpuTensor;

/// Tensor backend running on a single device through driver `D`.
///
/// Always handed out as `Arc<GpuBackend<D>>`: every tensor it creates keeps
/// the backend alive until the tensor is dropped.
pub struct GpuBackend<D: Driver> {
    context: DeviceContext<D>,
    config: BackendConfig,
    this: Weak<GpuBackend<D>>,
}

impl<D: Driver> GpuBackend<D> {
    /// Open the device at `config.device_ordinal`.
    pub fn new(config: BackendConfig) -> Result<Arc<Self>> {
        let driver = D::open(config.device_ordinal)
            .map_err(|e| TensorError::DeviceInit(e.to_string()))?;
        Self::with_driver(driver, config)
    }

    /// Build a backend over an already opened driver.
    pub fn with_driver(driver: D, config: BackendConfig) -> Result<Arc<Self>> {
        let context = DeviceContext::new(driver)?;
        Ok(Arc::new_cyclic(|this| GpuBackend {
            context,
            config,
            this: this.clone(),
        }))
    }

    pub fn context(&self) -> &DeviceContext<D> {
        &self.context
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn device_info(&self) -> DeviceInfo {
        self.context.info()
    }

    /// Recover the concrete tensor, rejecting tensors of any other backend.
    pub(crate) fn downcast<'a>(
        &self,
        x: &'a dyn TensorImpl,
        operation: &'static str,
    ) -> Result<&'a GpuTensor<D>> {
        x.as_any()
            .downcast_ref::<GpuTensor<D>>()
            .filter(|t| std::ptr::eq(Arc::as_ptr(t.gpu_backend()), self))
            .ok_or(TensorError::BackendMismatch { operation })
    }

    /// Bind a freshly allocated buffer to a new tensor handle.
    pub(crate) fn wrap(
        &self,
        shape: Shape,
        dtype: DType,
        buffer: Buffer<D>,
    ) -> Result<Arc<dyn TensorImpl>> {
        match self.this.upgrade() {
            Some(this) => Ok(Arc::new(GpuTensor::new(shape, dtype, buffer, this))),
            None => {
                self.context.release(buffer);
                Err(TensorError::Other("backend is being dropped".to_string()))
            }
        }
    }
}

impl<D: Driver> fmt::Debug for GpuBackend<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuBackend")
            .field("context", &self.context)
            .field("config", &self.config)
            .finish()
    }
}

impl<D: Driver> Backend for GpuBackend<D> {
    fn name(&self) -> &str {
        "gpu"
    }

    fn create_tensor(
        &self,
        shape: &Shape,
        dtype: DType,
        data: Option<&[u8]>,
    ) -> Result<Arc<dyn TensorImpl>> {
        if !dtype.is_known() {
            return Err(TensorError::UnsupportedDType(dtype.to_string()));
        }
        let bytes = shape
            .checked_numel()
            .and_then(|n| n.checked_mul(dtype.size_in_bytes()))
            .ok_or_else(|| TensorError::Allocation {
                bytes: usize::MAX,
                reason: format!("{} tensor of shape {} overflows usize", dtype, shape),
            })?;
        if let Some(data) = data {
            if data.len() != bytes {
                return Err(TensorError::Transfer(format!(
                    "initial data holds {} bytes, a {} tensor of shape {} needs {}",
                    data.len(),
                    dtype,
                    shape,
                    bytes
                )));
            }
        }

        let buffer = self.context.allocate(bytes)?;
        if let Some(data) = data {
            if let Err(e) = self.context.write(&buffer, data) {
                self.context.release(buffer);
                return Err(e);
            }
        }
        self.wrap(shape.clone(), dtype, buffer)
    }

    fn copy_to_host(&self, x: &dyn TensorImpl, dest: &mut [u8]) -> Result<()> {
        let x = self.downcast(x, "copyToHost")?;
        self.context.read(x.buffer(), dest)
    }

    fn copy(&self, x: &dyn TensorImpl) -> Result<Arc<dyn TensorImpl>> {
        let gx = self.downcast(x, "copy")?;
        let buffer = self.context.duplicate(gx.buffer())?;
        self.wrap(x.shape().clone(), x.dtype(), buffer)
    }

    fn cast(&self, x: &dyn TensorImpl, to: DType) -> Result<Arc<dyn TensorImpl>> {
        dispatch::cast::cast(self, x, to)
    }

    fn sync(&self) -> Result<()> {
        self.context.sync()
    }

    fn overlap_score(
        &self,
        x: &dyn TensorImpl,
        connections: &dyn TensorImpl,
        permeances: &dyn TensorImpl,
        connected_permeance: f32,
        active_threshold: usize,
        out: &dyn TensorImpl,
        has_unconnected_synapse: bool,
    ) -> Result<()> {
        dispatch::overlap::overlap_score(
            self,
            x,
            connections,
            permeances,
            connected_permeance,
            active_threshold,
            out,
            has_unconnected_synapse,
        )
    }

    fn global_inhibition(
        &self,
        x: &dyn TensorImpl,
        out: &dyn TensorImpl,
        fraction: f32,
    ) -> Result<()> {
        dispatch::inhibition::global_inhibition(self, x, out, fraction)
    }

    fn learn_correlation(
        &self,
        x: &dyn TensorImpl,
        learn: &dyn TensorImpl,
        connections: &dyn TensorImpl,
        permeances: &dyn TensorImpl,
        perm_inc: f32,
        perm_dec: f32,
    ) -> Result<()> {
        dispatch::learn::learn_correlation(
            self,
            x,
            learn,
            connections,
            permeances,
            perm_inc,
            perm_dec,
        )
    }

    fn sort_synapse(&self, connections: &dyn TensorImpl, permeances: &dyn TensorImpl) -> Result<()> {
        dispatch::sort::sort_synapse(self, connections, permeances)
    }
}
