use std::fmt;

use htm_tensor::{Result, TensorError};
use log::info;

use crate::cache::KernelCache;
use crate::driver::Driver;

/// Program and entry-point name of the kernel compiled at startup.
pub const NOOP_KERNEL: &str = "__htm_noop__";

const NOOP_SOURCE: &str =
    "extern \"C\" __global__ void __htm_noop__(int* p) { p[blockIdx.x * blockDim.x + threadIdx.x] = 0; }";

/// The opened device, its queue and the programs compiled for it.
pub struct DeviceContext<D: Driver> {
    driver: D,
    kernels: KernelCache<D>,
}

impl<D: Driver> DeviceContext<D> {
    /// Take ownership of an opened device and validate its compiler by
    /// building the no-op kernel.
    pub fn new(driver: D) -> Result<Self> {
        let props = driver.properties();
        if !driver.compiler_available() {
            return Err(TensorError::DeviceInit(format!(
                "compiler for {} is not available (devices that only run prebuilt \
                 binaries are not supported)",
                props.device_name
            )));
        }

        let kernels = KernelCache::new();
        kernels
            .compile_or_fetch(&driver, &[NOOP_SOURCE], NOOP_KERNEL, &[NOOP_KERNEL], false, "")
            .map_err(|e| {
                TensorError::DeviceInit(format!(
                    "cannot build kernels on {}: {}",
                    props.device_name, e
                ))
            })?;

        info!(
            "opened {} on platform {}",
            props.device_name, props.platform_name
        );
        Ok(DeviceContext { driver, kernels })
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn kernels(&self) -> &KernelCache<D> {
        &self.kernels
    }

    /// Operator-facing description of the device.
    pub fn info(&self) -> DeviceInfo {
        let props = self.driver.properties();
        let preferred_group_multiple = self
            .kernels
            .kernel(NOOP_KERNEL, NOOP_KERNEL)
            .map(|k| self.driver.preferred_group_multiple(&k))
            .unwrap_or(0);
        DeviceInfo {
            platform_name: props.platform_name,
            device_name: props.device_name,
            global_mem_bytes: props.global_mem_bytes,
            max_alloc_bytes: props.max_alloc_bytes,
            local_mem_bytes: props.local_mem_bytes,
            preferred_group_multiple,
        }
    }
}

impl<D: Driver> fmt::Debug for DeviceContext<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("driver", &self.driver)
            .field("programs", &self.kernels.len())
            .finish()
    }
}

/// Device report for diagnostics. Not part of the programmatic contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub platform_name: String,
    pub device_name: String,
    pub global_mem_bytes: u64,
    pub max_alloc_bytes: u64,
    pub local_mem_bytes: u64,
    pub preferred_group_multiple: usize,
}

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Platform: {}", self.platform_name)?;
        writeln!(f, "Device name: {}", self.device_name)?;
        writeln!(
            f,
            "Global memory size: {:.2} GB",
            self.global_mem_bytes as f64 / GIB
        )?;
        writeln!(
            f,
            "Max allocatable memory: {:.2} GB",
            self.max_alloc_bytes as f64 / GIB
        )?;
        writeln!(f, "Local memory size: {} KB", self.local_mem_bytes / 1024)?;
        writeln!(
            f,
            "Preferred work group size multiple: {}",
            self.preferred_group_multiple
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostDriver;

    #[test]
    fn test_noop_kernel_registered() {
        let ctx = DeviceContext::new(HostDriver::new()).unwrap();
        assert!(ctx.kernels().exists(NOOP_KERNEL, NOOP_KERNEL));
        assert_eq!(ctx.driver().builds(), 1);
    }

    #[test]
    fn test_device_without_compiler() {
        let err = DeviceContext::new(HostDriver::new().without_compiler()).unwrap_err();
        assert!(matches!(err, TensorError::DeviceInit(_)));
    }

    #[test]
    fn test_info_report() {
        let ctx = DeviceContext::new(HostDriver::new().with_max_alloc(1 << 30)).unwrap();
        let info = ctx.info();
        assert_eq!(info.preferred_group_multiple, 32);
        let report = info.to_string();
        assert!(report.contains("Device name: Host emulated device"));
        assert!(report.contains("Max allocatable memory: 1.00 GB"));
        assert!(report.contains("Local memory size: 48 KB"));
        assert!(report.contains("Preferred work group size multiple: 32"));
    }
}
