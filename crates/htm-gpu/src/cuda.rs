//! NVIDIA devices through the CUDA driver API and NVRTC.

use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cudarc::driver::sys::CUdevice_attribute;
use cudarc::driver::{
    result, CudaDevice, CudaFunction, CudaSlice, DevicePtr, LaunchAsync, LaunchConfig,
};
use cudarc::nvrtc::{compile_ptx, compile_ptx_with_opts, CompileError, CompileOptions};

use crate::driver::{DeviceProperties, Driver, DriverError, KernelArg, WorkSize};

// CUDA_ERROR_INVALID_VALUE / CUDA_ERROR_INVALID_SOURCE
const INVALID_VALUE: i32 = 1;
const INVALID_SOURCE: i32 = 300;

fn driver_error(e: cudarc::driver::DriverError) -> DriverError {
    DriverError::new(e.0 as i32, e.to_string())
}

/// Handle to a program: the module name it was loaded under.
#[derive(Debug)]
pub struct CudaProgram {
    module: String,
}

/// One CUDA device and its stream.
#[derive(Debug)]
pub struct CudaDriver {
    device: Arc<CudaDevice>,
    modules: AtomicUsize,
}

impl CudaDriver {
    fn attribute(&self, attr: CUdevice_attribute) -> u64 {
        self.device.attribute(attr).map(|v| v.max(0) as u64).unwrap_or(0)
    }

    fn include_paths() -> Vec<String> {
        let root = std::env::var("CUDA_PATH").unwrap_or_else(|_| "/usr/local/cuda".to_string());
        vec![format!("{}/include", root)]
    }
}

impl Driver for CudaDriver {
    type Buffer = CudaSlice<u8>;
    type Program = CudaProgram;
    type Kernel = CudaFunction;

    fn open(ordinal: usize) -> Result<Self, DriverError> {
        let device = CudaDevice::new(ordinal).map_err(driver_error)?;
        Ok(CudaDriver {
            device,
            modules: AtomicUsize::new(0),
        })
    }

    fn properties(&self) -> DeviceProperties {
        let total = result::mem_get_info()
            .map(|(_, total)| total as u64)
            .unwrap_or(0);
        DeviceProperties {
            platform_name: "NVIDIA CUDA".to_string(),
            device_name: self.device.name().unwrap_or_else(|_| "unknown".to_string()),
            global_mem_bytes: total,
            max_alloc_bytes: total,
            local_mem_bytes: self
                .attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_BLOCK),
        }
    }

    fn compiler_available(&self) -> bool {
        compile_ptx("extern \"C\" __global__ void __htm_probe__() {}").is_ok()
    }

    fn build(
        &self,
        source: &str,
        flags: &str,
        entry_points: &[&'static str],
    ) -> Result<CudaProgram, DriverError> {
        let opts = CompileOptions {
            options: flags.split_whitespace().map(str::to_string).collect(),
            include_paths: Self::include_paths(),
            ..Default::default()
        };
        let ptx = compile_ptx_with_opts(source, opts).map_err(|e| match e {
            CompileError::CompileError { log, .. } => {
                DriverError::new(INVALID_SOURCE, log.to_string_lossy().into_owned())
            }
            other => DriverError::new(INVALID_SOURCE, other.to_string()),
        })?;

        let module = format!("htm_program_{}", self.modules.fetch_add(1, Ordering::Relaxed));
        self.device
            .load_ptx(ptx, &module, entry_points)
            .map_err(driver_error)?;
        Ok(CudaProgram { module })
    }

    fn entry_point(&self, program: &CudaProgram, name: &str) -> Option<CudaFunction> {
        self.device.get_func(&program.module, name)
    }

    fn preferred_group_multiple(&self, _kernel: &CudaFunction) -> usize {
        self.attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_WARP_SIZE) as usize
    }

    fn alloc(&self, bytes: usize) -> Result<CudaSlice<u8>, DriverError> {
        // Zero-sized allocations are rejected by the driver.
        self.device.alloc_zeros::<u8>(bytes.max(1)).map_err(driver_error)
    }

    fn free(&self, buffer: CudaSlice<u8>) {
        // Dropping a slice frees it on the device stream.
        drop(buffer);
    }

    fn write(&self, buffer: &CudaSlice<u8>, data: &[u8]) -> Result<(), DriverError> {
        if data.len() > buffer.len() {
            return Err(DriverError::new(INVALID_VALUE, "write past the end of a buffer"));
        }
        if data.is_empty() {
            return Ok(());
        }
        self.device.synchronize().map_err(driver_error)?;
        unsafe { result::memcpy_htod_sync(*buffer.device_ptr(), data) }.map_err(driver_error)
    }

    fn read(&self, buffer: &CudaSlice<u8>, dest: &mut [u8]) -> Result<(), DriverError> {
        if dest.len() > buffer.len() {
            return Err(DriverError::new(INVALID_VALUE, "read past the end of a buffer"));
        }
        if dest.is_empty() {
            return Ok(());
        }
        self.device.synchronize().map_err(driver_error)?;
        unsafe { result::memcpy_dtoh_sync(dest, *buffer.device_ptr()) }.map_err(driver_error)
    }

    fn copy(
        &self,
        src: &CudaSlice<u8>,
        dst: &CudaSlice<u8>,
        bytes: usize,
    ) -> Result<(), DriverError> {
        if bytes > src.len() || bytes > dst.len() {
            return Err(DriverError::new(INVALID_VALUE, "copy past the end of a buffer"));
        }
        if bytes == 0 {
            return Ok(());
        }
        unsafe {
            result::memcpy_dtod_async(
                *dst.device_ptr(),
                *src.device_ptr(),
                bytes,
                *self.device.cu_stream(),
            )
        }
        .map_err(driver_error)
    }

    fn launch(
        &self,
        kernel: &CudaFunction,
        args: &[KernelArg<'_, CudaSlice<u8>>],
        work: WorkSize,
    ) -> Result<(), DriverError> {
        if work.local == 0 {
            return Err(DriverError::new(INVALID_VALUE, "group size 0"));
        }

        // Argument values must stay in place while their addresses are in use.
        let mut pointers: Vec<u64> = Vec::with_capacity(args.len());
        let mut ints: Vec<i32> = Vec::with_capacity(args.len());
        let mut floats: Vec<f32> = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                KernelArg::Buffer(buf) => pointers.push(*buf.device_ptr()),
                KernelArg::Int(v) => ints.push(*v),
                KernelArg::Float(v) => floats.push(*v),
            }
        }
        let (mut p, mut i, mut f) = (0, 0, 0);
        let mut params: Vec<*mut c_void> = Vec::with_capacity(args.len());
        for arg in args {
            let ptr = match arg {
                KernelArg::Buffer(_) => {
                    p += 1;
                    &mut pointers[p - 1] as *mut u64 as *mut c_void
                }
                KernelArg::Int(_) => {
                    i += 1;
                    &mut ints[i - 1] as *mut i32 as *mut c_void
                }
                KernelArg::Float(_) => {
                    f += 1;
                    &mut floats[f - 1] as *mut f32 as *mut c_void
                }
            };
            params.push(ptr);
        }

        let cfg = LaunchConfig {
            grid_dim: (work.groups() as u32, 1, 1),
            block_dim: (work.local as u32, 1, 1),
            shared_mem_bytes: 0,
        };
        unsafe { kernel.clone().launch(cfg, &mut params[..]) }.map_err(driver_error)
    }

    fn finish(&self) -> Result<(), DriverError> {
        self.device.synchronize().map_err(driver_error)
    }
}
