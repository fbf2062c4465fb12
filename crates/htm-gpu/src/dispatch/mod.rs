//! Kernel dispatch for the HTM operations.
//!
//! Every operation checks its operands, folds the compile-time parameters
//! into a flags string, compiles (or fetches) the program named after those
//! flags, binds its arguments and enqueues it. All checks run before
//! anything is allocated or submitted.

pub(crate) mod cast;
pub(crate) mod inhibition;
pub(crate) mod learn;
pub(crate) mod overlap;
pub(crate) mod sort;

use htm_tensor::{DType, Result, TensorError, TensorImpl};
use log::debug;
use sha2::{Digest, Sha256};

use crate::backend::GpuBackend;
use crate::driver::{Driver, KernelArg, WorkSize};

/// Round `size` up to a multiple of `mul`, capped at `max`.
///
/// Large inputs are not split into several launches: the kernels walk their
/// elements with a grid-stride loop instead. `mul` must be non-zero.
pub fn select_work_size(max: usize, mul: usize, size: usize) -> usize {
    (size.div_ceil(mul) * mul).min(max)
}

/// Program name for operation `op` specialized with `flags`: the operation
/// name followed by 16 hex digits of the flags' SHA-256.
pub fn program_name(op: &str, flags: &str) -> String {
    let digest = Sha256::digest(flags.as_bytes());
    let suffix: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}{}", op, suffix)
}

pub(crate) fn expect_dtype(x: &dyn TensorImpl, expected: DType) -> Result<()> {
    if x.dtype() != expected {
        return Err(TensorError::DTypeMismatch {
            expected: expected.to_string(),
            got: x.dtype().to_string(),
        });
    }
    Ok(())
}

pub(crate) fn expect_same_shape(a: &dyn TensorImpl, b: &dyn TensorImpl) -> Result<()> {
    if a.shape() != b.shape() {
        return Err(TensorError::ShapeMismatch {
            expected: a.shape().dims().to_vec(),
            got: b.shape().dims().to_vec(),
        });
    }
    Ok(())
}

/// `(cells, synapses_per_cell)` of a connections tensor. The last dimension
/// holds one cell's synapses.
pub(crate) fn synapse_layout(connections: &dyn TensorImpl) -> Result<(usize, usize)> {
    match connections.shape().last() {
        Some(per_cell) if per_cell > 0 => Ok((connections.size() / per_cell, per_cell)),
        _ => Err(TensorError::ShapeMismatch {
            expected: vec![connections.size().max(1), 1],
            got: connections.shape().dims().to_vec(),
        }),
    }
}

pub(crate) fn expect_cells(x: &dyn TensorImpl, cells: usize) -> Result<()> {
    if x.size() != cells {
        return Err(TensorError::ShapeMismatch {
            expected: vec![cells],
            got: x.shape().dims().to_vec(),
        });
    }
    Ok(())
}

/// Scalar kernel argument from a host size.
pub(crate) fn int_arg(value: usize, what: &str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| TensorError::Other(format!("{} = {} does not fit in a kernel int", what, value)))
}

impl<D: Driver> GpuBackend<D> {
    /// Compile (or fetch) `file` specialized with `flags` and return the
    /// program name it is cached under.
    pub(crate) fn specialize(
        &self,
        file: &str,
        op: &str,
        flags: &str,
        entry_points: &[&'static str],
    ) -> Result<String> {
        let name = program_name(op, flags);
        self.context().kernels().compile_from_file(
            self.context().driver(),
            &[self.config().kernel_path(file)],
            &name,
            entry_points,
            false,
            flags,
        )?;
        Ok(name)
    }

    pub(crate) fn enqueue(
        &self,
        operation: &'static str,
        kernel: &D::Kernel,
        args: &[KernelArg<'_, D::Buffer>],
        work: WorkSize,
    ) -> Result<()> {
        if work.global == 0 {
            debug!("{}: empty launch skipped", operation);
            return Ok(());
        }
        self.context()
            .driver()
            .launch(kernel, args, work)
            .map_err(|e| TensorError::Dispatch {
                operation,
                code: e.code,
            })
    }
}
