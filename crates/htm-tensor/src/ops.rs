//! HTM operations over tensor handles.
//!
//! Each function forwards to the backend that owns the first operand. Output
//! tensors are passed in and written on the device.

use crate::error::Result;
use crate::tensor::Tensor;

/// See [`Backend::overlap_score`](crate::Backend::overlap_score).
pub fn overlap_score(
    x: &Tensor,
    connections: &Tensor,
    permeances: &Tensor,
    connected_permeance: f32,
    active_threshold: usize,
    out: &Tensor,
    has_unconnected_synapse: bool,
) -> Result<()> {
    x.backend().overlap_score(
        x.pimpl(),
        connections.pimpl(),
        permeances.pimpl(),
        connected_permeance,
        active_threshold,
        out.pimpl(),
        has_unconnected_synapse,
    )
}

/// See [`Backend::global_inhibition`](crate::Backend::global_inhibition).
pub fn global_inhibition(x: &Tensor, out: &Tensor, fraction: f32) -> Result<()> {
    x.backend().global_inhibition(x.pimpl(), out.pimpl(), fraction)
}

/// See [`Backend::learn_correlation`](crate::Backend::learn_correlation).
pub fn learn_correlation(
    x: &Tensor,
    learn: &Tensor,
    connections: &Tensor,
    permeances: &Tensor,
    perm_inc: f32,
    perm_dec: f32,
) -> Result<()> {
    x.backend().learn_correlation(
        x.pimpl(),
        learn.pimpl(),
        connections.pimpl(),
        permeances.pimpl(),
        perm_inc,
        perm_dec,
    )
}

/// See [`Backend::sort_synapse`](crate::Backend::sort_synapse).
pub fn sort_synapse(connections: &Tensor, permeances: &Tensor) -> Result<()> {
    connections
        .backend()
        .sort_synapse(connections.pimpl(), permeances.pimpl())
}

/// Block until everything submitted through `x`'s backend has completed.
pub fn sync(x: &Tensor) -> Result<()> {
    x.backend().sync()
}
