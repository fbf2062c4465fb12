use htm_tensor::{DType, Result, TensorImpl};

use super::{expect_cells, expect_dtype, expect_same_shape, int_arg, select_work_size, synapse_layout};
use crate::backend::GpuBackend;
use crate::driver::{Driver, KernelArg, WorkSize};

const OPERATION: &str = "learnCorrelation";
const LOCAL_SIZE: usize = 128;
const MAX_GLOBAL_SIZE: usize = 4096;

pub(crate) fn learn_correlation<D: Driver>(
    backend: &GpuBackend<D>,
    x: &dyn TensorImpl,
    learn: &dyn TensorImpl,
    connections: &dyn TensorImpl,
    permeances: &dyn TensorImpl,
    perm_inc: f32,
    perm_dec: f32,
) -> Result<()> {
    let gx = backend.downcast(x, OPERATION)?;
    let glearn = backend.downcast(learn, OPERATION)?;
    let gconn = backend.downcast(connections, OPERATION)?;
    let gperm = backend.downcast(permeances, OPERATION)?;

    expect_dtype(x, DType::Bool)?;
    expect_dtype(learn, DType::Bool)?;
    expect_same_shape(x, learn)?;
    expect_dtype(connections, DType::Int32)?;
    expect_dtype(permeances, DType::Float)?;
    expect_same_shape(connections, permeances)?;
    let (cells, per_cell) = synapse_layout(connections)?;
    expect_cells(learn, cells)?;
    let cells = int_arg(cells, "cells")?;

    let flags = format!(
        "-DINPUT_SIZE={} -DMAX_SYNAPSE_PER_CELL={}",
        x.size(),
        per_cell
    );
    let program = backend.specialize("learn_correlation.cu", OPERATION, &flags, &[OPERATION])?;
    let kernel = backend.context().kernels().kernel(&program, OPERATION)?;

    let args = [
        KernelArg::Buffer(gx.buffer().raw()),
        KernelArg::Buffer(glearn.buffer().raw()),
        KernelArg::Buffer(gconn.buffer().raw()),
        KernelArg::Buffer(gperm.buffer().raw()),
        KernelArg::Float(perm_inc),
        KernelArg::Float(perm_dec),
        KernelArg::Int(cells),
    ];
    let global = select_work_size(MAX_GLOBAL_SIZE, LOCAL_SIZE, x.size());
    backend.enqueue(OPERATION, &kernel, &args, WorkSize::new(global, LOCAL_SIZE))
}
