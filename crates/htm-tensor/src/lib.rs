//! `htm-tensor` - Tensor handles and backend capabilities for the HTM runtime.
//!
//! This crate provides:
//! - A `Tensor` handle bound to backend-owned memory
//! - A `Backend` trait describing what a compute backend offers (allocation,
//!   transfer, casting and the HTM operations)
//! - Shape utilities
//! - Data type definitions (Bool, Int32, Float, Half)

pub mod backend;
pub mod dtype;
pub mod error;
pub mod ops;
pub mod shape;
pub mod tensor;

// Re-export primary types at the crate root for convenience.
pub use backend::{Backend, TensorImpl};
pub use dtype::{DType, Element};
pub use error::{Result, TensorError};
pub use shape::Shape;
pub use tensor::Tensor;
