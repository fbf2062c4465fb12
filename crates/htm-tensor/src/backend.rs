use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

use crate::dtype::DType;
use crate::error::Result;
use crate::shape::Shape;

/// Backend-owned representation of a tensor.
///
/// Each backend implements this for its own storage type. Handles are shared
/// through `Arc`; the backend releases the underlying memory when the last
/// owner drops it.
pub trait TensorImpl: Send + Sync + Debug + Any {
    fn shape(&self) -> &Shape;

    fn dtype(&self) -> DType;

    /// The backend that allocated this tensor.
    fn backend(&self) -> Arc<dyn Backend>;

    /// Downcast hook so a backend can recover its concrete tensor type.
    fn as_any(&self) -> &dyn Any;

    /// Number of elements.
    fn size(&self) -> usize {
        self.shape().numel()
    }

    /// Size of the backing memory in bytes.
    fn byte_size(&self) -> usize {
        self.size() * self.dtype().size_in_bytes()
    }
}

/// Capability set every compute backend provides to the tensor layer.
///
/// All operations are submitted in program order. Operations that write into
/// an existing tensor (`out`, `permeances`, ...) take it by shared reference:
/// the device memory behind a handle is mutated through the backend's queue,
/// not through the handle.
pub trait Backend: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "gpu").
    fn name(&self) -> &str;

    /// Allocate a tensor of `shape` and `dtype`.
    ///
    /// When `data` is given it must hold exactly `shape.numel() *
    /// dtype.size_in_bytes()` bytes; the write completes before this returns.
    fn create_tensor(
        &self,
        shape: &Shape,
        dtype: DType,
        data: Option<&[u8]>,
    ) -> Result<Arc<dyn TensorImpl>>;

    /// Blocking read of the whole tensor into `dest`, which must be exactly
    /// the tensor's byte size.
    fn copy_to_host(&self, x: &dyn TensorImpl, dest: &mut [u8]) -> Result<()>;

    /// Device-side duplicate of `x` with its own independent memory.
    fn copy(&self, x: &dyn TensorImpl) -> Result<Arc<dyn TensorImpl>>;

    /// Element-wise conversion of `x` into a new tensor of `to`.
    fn cast(&self, x: &dyn TensorImpl, to: DType) -> Result<Arc<dyn TensorImpl>>;

    /// Block until all submitted work has completed.
    fn sync(&self) -> Result<()>;

    /// Spatial-pooler overlap: for each cell, the number of connected
    /// synapses whose input bit is on, zeroed below `active_threshold`.
    ///
    /// - `x`: Bool input bits
    /// - `connections`: Int32 presynaptic indices, shape [.., synapses_per_cell]
    /// - `permeances`: Float, same shape as `connections`
    /// - `out`: Int32, one score per cell
    #[allow(clippy::too_many_arguments)]
    fn overlap_score(
        &self,
        x: &dyn TensorImpl,
        connections: &dyn TensorImpl,
        permeances: &dyn TensorImpl,
        connected_permeance: f32,
        active_threshold: usize,
        out: &dyn TensorImpl,
        has_unconnected_synapse: bool,
    ) -> Result<()>;

    /// Keep the top `fraction` of scores in `x` active in the Bool `out`.
    fn global_inhibition(&self, x: &dyn TensorImpl, out: &dyn TensorImpl, fraction: f32)
        -> Result<()>;

    /// Hebbian permanence update for the cells marked in `learn`.
    fn learn_correlation(
        &self,
        x: &dyn TensorImpl,
        learn: &dyn TensorImpl,
        connections: &dyn TensorImpl,
        permeances: &dyn TensorImpl,
        perm_inc: f32,
        perm_dec: f32,
    ) -> Result<()>;

    /// Sort every cell's synapses by presynaptic index, unused slots last.
    fn sort_synapse(&self, connections: &dyn TensorImpl, permeances: &dyn TensorImpl)
        -> Result<()>;
}
