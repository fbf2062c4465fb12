use htm_tensor::{DType, Result, TensorError, TensorImpl};

use super::{expect_dtype, expect_same_shape, int_arg};
use crate::backend::GpuBackend;
use crate::driver::{Driver, KernelArg, WorkSize};

const OPERATION: &str = "globalInhibition";
/// Scores are clamped to this bound when building the top-k histogram.
const MAX_INPUT_VALUE: usize = 2000;

pub(crate) fn global_inhibition<D: Driver>(
    backend: &GpuBackend<D>,
    x: &dyn TensorImpl,
    out: &dyn TensorImpl,
    fraction: f32,
) -> Result<()> {
    let gx = backend.downcast(x, OPERATION)?;
    let gout = backend.downcast(out, OPERATION)?;

    expect_dtype(x, DType::Int32)?;
    expect_dtype(out, DType::Bool)?;
    expect_same_shape(x, out)?;
    if !(0.0..=1.0).contains(&fraction) {
        return Err(TensorError::Other(format!(
            "{}: fraction must be within [0, 1], got {}",
            OPERATION, fraction
        )));
    }
    let k = int_arg((x.size() as f64 * f64::from(fraction)) as usize, "k")?;

    let flags = format!(
        "-DINPUT_SIZE={} -DMAX_INPUT_VALUE={}",
        x.size(),
        MAX_INPUT_VALUE
    );
    let program = backend.specialize(
        "global_inhibition.cu",
        OPERATION,
        &flags,
        &["fastTopK", "threshold"],
    )?;
    let kernels = backend.context().kernels();
    let top_k = kernels.kernel(&program, "fastTopK")?;
    let threshold = kernels.kernel(&program, "threshold")?;

    let ctx = backend.context();
    let cutoff = ctx.allocate(DType::Int32.size_in_bytes())?;
    let result = backend
        .enqueue(
            OPERATION,
            &top_k,
            &[
                KernelArg::Buffer(gx.buffer().raw()),
                KernelArg::Buffer(cutoff.raw()),
                KernelArg::Int(k),
            ],
            WorkSize::new(256, 256),
        )
        .and_then(|()| {
            backend.enqueue(
                OPERATION,
                &threshold,
                &[
                    KernelArg::Buffer(gx.buffer().raw()),
                    KernelArg::Buffer(gout.buffer().raw()),
                    KernelArg::Buffer(cutoff.raw()),
                ],
                WorkSize::new(1024, 32),
            )
        });
    ctx.release(cutoff);
    result
}
