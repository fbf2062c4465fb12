use std::sync::Arc;

use htm_tensor::{DType, Result, TensorError, TensorImpl};

use super::int_arg;
use crate::backend::GpuBackend;
use crate::driver::{Driver, KernelArg, WorkSize};

const OPERATION: &str = "cast";

fn type_name(dtype: DType) -> Result<&'static str> {
    dtype
        .device_type_name()
        .ok_or_else(|| TensorError::UnsupportedDType(dtype.to_string()))
}

pub(crate) fn cast<D: Driver>(
    backend: &GpuBackend<D>,
    x: &dyn TensorImpl,
    to: DType,
) -> Result<Arc<dyn TensorImpl>> {
    let gx = backend.downcast(x, OPERATION)?;
    let flags = format!(
        "-DInType={} -DOutType={}",
        type_name(x.dtype())?,
        type_name(to)?
    );
    let count = int_arg(x.size(), "count")?;

    let program = backend.specialize("cast.cu", OPERATION, &flags, &[OPERATION])?;
    let kernel = backend.context().kernels().kernel(&program, OPERATION)?;

    let ctx = backend.context();
    let result = ctx.allocate(x.size() * to.size_in_bytes())?;
    let launched = backend.enqueue(
        OPERATION,
        &kernel,
        &[
            KernelArg::Buffer(gx.buffer().raw()),
            KernelArg::Buffer(result.raw()),
            KernelArg::Int(count),
        ],
        WorkSize::new(1024, 32),
    );
    if let Err(e) = launched {
        ctx.release(result);
        return Err(e);
    }
    backend.wrap(x.shape().clone(), to, result)
}
