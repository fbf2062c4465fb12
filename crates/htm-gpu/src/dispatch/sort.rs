use htm_tensor::{DType, Result, TensorImpl};

use super::{expect_dtype, expect_same_shape, int_arg, select_work_size, synapse_layout};
use crate::backend::GpuBackend;
use crate::driver::{Driver, KernelArg, WorkSize};

const OPERATION: &str = "sortSynapse";
const LOCAL_SIZE: usize = 128;
const MAX_GLOBAL_SIZE: usize = 4096;

pub(crate) fn sort_synapse<D: Driver>(
    backend: &GpuBackend<D>,
    connections: &dyn TensorImpl,
    permeances: &dyn TensorImpl,
) -> Result<()> {
    let gconn = backend.downcast(connections, OPERATION)?;
    let gperm = backend.downcast(permeances, OPERATION)?;
    expect_dtype(connections, DType::Int32)?;
    expect_dtype(permeances, DType::Float)?;
    expect_same_shape(connections, permeances)?;
    let (cells, per_cell) = synapse_layout(connections)?;
    let cell_count = int_arg(cells, "cells")?;

    let flags = format!("-DMAX_SYNAPSE_PER_CELL={}", per_cell);
    let program = backend.specialize("sort_synapse.cu", OPERATION, &flags, &[OPERATION])?;
    let kernel = backend.context().kernels().kernel(&program, OPERATION)?;

    let ctx = backend.context();
    let aux_connections = ctx.allocate(gconn.buffer().len())?;
    let aux_permeances = match ctx.allocate(gperm.buffer().len()) {
        Ok(buf) => buf,
        Err(e) => {
            ctx.release(aux_connections);
            return Err(e);
        }
    };

    let args = [
        KernelArg::Buffer(gconn.buffer().raw()),
        KernelArg::Buffer(gperm.buffer().raw()),
        KernelArg::Int(cell_count),
        KernelArg::Buffer(aux_connections.raw()),
        KernelArg::Buffer(aux_permeances.raw()),
    ];
    let global = select_work_size(MAX_GLOBAL_SIZE, LOCAL_SIZE, cells);
    let result = backend.enqueue(OPERATION, &kernel, &args, WorkSize::new(global, LOCAL_SIZE));
    ctx.release(aux_connections);
    ctx.release(aux_permeances);
    result
}
