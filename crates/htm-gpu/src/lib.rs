//! `htm-gpu` - GPU execution backend for the HTM tensor runtime.
//!
//! This crate provides:
//! - A device context that validates the runtime compiler on startup
//! - A kernel cache compiling each named program once
//! - Device buffers bound to tensor handles and released on drop
//! - Dispatch of the HTM operations with per-parameter program specialization
//!
//! Devices are reached through the [`Driver`] trait. [`HostDriver`] emulates a
//! device on the host and is always available; `CudaDriver` runs on NVIDIA
//! GPUs when the `cuda` feature is enabled.

pub mod backend;
pub mod buffer;
pub mod cache;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod driver;
pub mod host;
pub mod tensor;

#[cfg(feature = "cuda")]
pub mod cuda;

pub use backend::GpuBackend;
pub use buffer::Buffer;
pub use cache::KernelCache;
pub use config::BackendConfig;
pub use context::{DeviceContext, DeviceInfo};
pub use dispatch::{program_name, select_work_size};
pub use driver::{DeviceProperties, Driver, DriverError, KernelArg, WorkSize};
pub use host::HostDriver;
pub use tensor::GpuTensor;

#[cfg(feature = "cuda")]
pub use cuda::CudaDriver;
