use htm_tensor::{DType, Result, TensorImpl};

use super::{expect_cells, expect_dtype, expect_same_shape, int_arg, select_work_size, synapse_layout};
use crate::backend::GpuBackend;
use crate::driver::{Driver, KernelArg, WorkSize};

const OPERATION: &str = "overlapScore";
const LOCAL_SIZE: usize = 64;
const MAX_GLOBAL_SIZE: usize = 8152;

#[allow(clippy::too_many_arguments)]
pub(crate) fn overlap_score<D: Driver>(
    backend: &GpuBackend<D>,
    x: &dyn TensorImpl,
    connections: &dyn TensorImpl,
    permeances: &dyn TensorImpl,
    connected_permeance: f32,
    active_threshold: usize,
    out: &dyn TensorImpl,
    has_unconnected_synapse: bool,
) -> Result<()> {
    let gx = backend.downcast(x, OPERATION)?;
    let gconn = backend.downcast(connections, OPERATION)?;
    let gperm = backend.downcast(permeances, OPERATION)?;
    let gout = backend.downcast(out, OPERATION)?;

    expect_dtype(x, DType::Bool)?;
    expect_dtype(connections, DType::Int32)?;
    expect_dtype(permeances, DType::Float)?;
    expect_dtype(out, DType::Int32)?;
    expect_same_shape(connections, permeances)?;
    let (cells, per_cell) = synapse_layout(connections)?;
    expect_cells(out, cells)?;
    let cells = int_arg(cells, "cells")?;
    let active_threshold = int_arg(active_threshold, "active_threshold")?;

    let flags = format!(
        "-DINPUT_SIZE={} -DMAX_SYNAPSE_PER_CELL={} -DNO_UNUSED_SYNAPSE={}",
        x.size(),
        per_cell,
        u8::from(!has_unconnected_synapse)
    );
    let program = backend.specialize("overlap_score.cu", OPERATION, &flags, &[OPERATION])?;
    let kernel = backend.context().kernels().kernel(&program, OPERATION)?;

    let args = [
        KernelArg::Buffer(gx.buffer().raw()),
        KernelArg::Buffer(gconn.buffer().raw()),
        KernelArg::Buffer(gperm.buffer().raw()),
        KernelArg::Buffer(gout.buffer().raw()),
        KernelArg::Float(connected_permeance),
        KernelArg::Int(active_threshold),
        KernelArg::Int(cells),
    ];
    let global = select_work_size(MAX_GLOBAL_SIZE, LOCAL_SIZE, x.size());
    backend.enqueue(OPERATION, &kernel, &args, WorkSize::new(global, LOCAL_SIZE))
}
