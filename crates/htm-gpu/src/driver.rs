use std::fmt::Debug;

use thiserror::Error;

/// Failure reported by a device driver.
///
/// `code` is the driver's native status code. For build failures `message`
/// carries the compiler log verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (code {code})")]
pub struct DriverError {
    pub code: i32,
    pub message: String,
}

impl DriverError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        DriverError {
            code,
            message: message.into(),
        }
    }
}

/// Launch geometry: `global` work items split into groups of `local`.
///
/// `global` need not be a multiple of `local`; the last group is then
/// partial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkSize {
    pub global: usize,
    pub local: usize,
}

impl WorkSize {
    pub fn new(global: usize, local: usize) -> Self {
        WorkSize { global, local }
    }

    /// Number of groups in the launch, counting a partial last group.
    pub fn groups(&self) -> usize {
        if self.local == 0 {
            0
        } else {
            self.global.div_ceil(self.local)
        }
    }
}

/// One positional kernel argument.
#[derive(Debug, Clone, Copy)]
pub enum KernelArg<'a, B> {
    Buffer(&'a B),
    Int(i32),
    Float(f32),
}

/// Static description of the opened device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProperties {
    pub platform_name: String,
    pub device_name: String,
    pub global_mem_bytes: u64,
    pub max_alloc_bytes: u64,
    pub local_mem_bytes: u64,
}

/// The raw device capabilities the backend is built on.
///
/// A driver owns exactly one device and one in-order queue: every `copy` and
/// `launch` observes the completion of everything submitted before it.
/// `write`, `read` and `finish` block the calling thread; `copy` and `launch`
/// only enqueue.
pub trait Driver: Send + Sync + Debug + Sized + 'static {
    type Buffer: Send + Sync + Debug;
    type Program: Send;
    type Kernel: Clone + Send + Sync;

    /// Open the device at `ordinal` on the first available platform.
    fn open(ordinal: usize) -> Result<Self, DriverError>;

    fn properties(&self) -> DeviceProperties;

    /// False for devices that only run prebuilt binaries.
    fn compiler_available(&self) -> bool;

    /// Compile `source` with `flags` as literal compiler arguments.
    /// `entry_points` lists the kernels the caller will look up afterwards.
    fn build(
        &self,
        source: &str,
        flags: &str,
        entry_points: &[&'static str],
    ) -> Result<Self::Program, DriverError>;

    /// Resolve a kernel from a built program.
    fn entry_point(&self, program: &Self::Program, name: &str) -> Option<Self::Kernel>;

    /// Preferred group-size granularity for `kernel`.
    fn preferred_group_multiple(&self, kernel: &Self::Kernel) -> usize;

    fn alloc(&self, bytes: usize) -> Result<Self::Buffer, DriverError>;

    /// Return a buffer to the device. Ordered after all submitted work.
    fn free(&self, buffer: Self::Buffer);

    /// Blocking host→device write of `data` to the start of `buffer`.
    fn write(&self, buffer: &Self::Buffer, data: &[u8]) -> Result<(), DriverError>;

    /// Blocking device→host read of the first `dest.len()` bytes.
    fn read(&self, buffer: &Self::Buffer, dest: &mut [u8]) -> Result<(), DriverError>;

    /// Enqueue a device-side copy of `bytes` bytes.
    fn copy(&self, src: &Self::Buffer, dst: &Self::Buffer, bytes: usize)
        -> Result<(), DriverError>;

    fn launch(
        &self,
        kernel: &Self::Kernel,
        args: &[KernelArg<'_, Self::Buffer>],
        work: WorkSize,
    ) -> Result<(), DriverError>;

    /// Wait for the queue to drain.
    fn finish(&self) -> Result<(), DriverError>;
}
