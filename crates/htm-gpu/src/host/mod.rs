//! Emulated device executing kernels on the host.
//!
//! `HostDriver` follows the same contract as a real device: programs are
//! "built" from kernel source (entry points are taken from `__global__`
//! declarations, `-D` flags become defines), buffers are opaque handles that
//! must be freed explicitly, and launches run to completion in submission
//! order. The kernel bodies are host routines registered per entry-point name
//! in [`kernels`].

mod kernels;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::driver::{DeviceProperties, Driver, DriverError, KernelArg, WorkSize};

use kernels::{HostArg, Invocation, Routine};

// Status codes, numbered like the CUDA driver API.
pub(crate) const INVALID_VALUE: i32 = 1;
pub(crate) const OUT_OF_MEMORY: i32 = 2;
pub(crate) const NO_DEVICE: i32 = 100;
pub(crate) const INVALID_SOURCE: i32 = 300;
pub(crate) const INVALID_HANDLE: i32 = 400;
pub(crate) const NOT_FOUND: i32 = 500;
pub(crate) const LAUNCH_FAILED: i32 = 719;

const DEFAULT_MAX_ALLOC: usize = 1 << 30;
const HOST_GROUP_MULTIPLE: usize = 32;
const MAX_GROUP_SIZE: usize = 1024;

pub(crate) type Defines = HashMap<String, String>;

/// Handle to host-emulated device memory.
#[derive(Debug)]
pub struct HostBuffer {
    id: u64,
    bytes: usize,
}

impl HostBuffer {
    pub fn len(&self) -> usize {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }
}

/// A "built" program: the declared entry points and the defines it was
/// specialized with.
#[derive(Debug)]
pub struct HostProgram {
    entry_points: HashSet<String>,
    defines: Arc<Defines>,
}

#[derive(Clone)]
pub struct HostKernel {
    name: String,
    routine: Option<Routine>,
    defines: Arc<Defines>,
}

impl std::fmt::Debug for HostKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostKernel")
            .field("name", &self.name)
            .field("defines", &self.defines)
            .finish()
    }
}

#[derive(Debug, Default)]
struct HostState {
    memory: HashMap<u64, Vec<u8>>,
    next_id: u64,
    builds: usize,
    launches: usize,
}

/// Host-emulated compute device.
#[derive(Debug)]
pub struct HostDriver {
    max_alloc: usize,
    has_compiler: bool,
    state: Mutex<HostState>,
}

impl HostDriver {
    pub fn new() -> Self {
        HostDriver {
            max_alloc: DEFAULT_MAX_ALLOC,
            has_compiler: true,
            state: Mutex::new(HostState::default()),
        }
    }

    /// Reject single allocations larger than `bytes`.
    pub fn with_max_alloc(mut self, bytes: usize) -> Self {
        self.max_alloc = bytes;
        self
    }

    /// Emulate a device that cannot compile kernels at runtime.
    pub fn without_compiler(mut self) -> Self {
        self.has_compiler = false;
        self
    }

    /// Number of successful program builds.
    pub fn builds(&self) -> usize {
        self.state.lock().builds
    }

    /// Number of kernel launches executed.
    pub fn launches(&self) -> usize {
        self.state.lock().launches
    }

    /// Number of allocations not yet freed.
    pub fn live_buffers(&self) -> usize {
        self.state.lock().memory.len()
    }
}

impl Default for HostDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for HostDriver {
    type Buffer = HostBuffer;
    type Program = HostProgram;
    type Kernel = HostKernel;

    fn open(ordinal: usize) -> Result<Self, DriverError> {
        if ordinal != 0 {
            return Err(DriverError::new(
                NO_DEVICE,
                format!("no device at ordinal {} on the host platform", ordinal),
            ));
        }
        Ok(HostDriver::new())
    }

    fn properties(&self) -> DeviceProperties {
        DeviceProperties {
            platform_name: "Host emulation".to_string(),
            device_name: "Host emulated device".to_string(),
            global_mem_bytes: self.max_alloc as u64,
            max_alloc_bytes: self.max_alloc as u64,
            local_mem_bytes: 48 * 1024,
        }
    }

    fn compiler_available(&self) -> bool {
        self.has_compiler
    }

    fn build(
        &self,
        source: &str,
        flags: &str,
        _entry_points: &[&'static str],
    ) -> Result<HostProgram, DriverError> {
        if !self.has_compiler {
            return Err(DriverError::new(NOT_FOUND, "no runtime compiler"));
        }
        let defines = parse_flags(flags)?;
        check_error_directives(source)?;
        let entry_points = declared_entry_points(source);
        self.state.lock().builds += 1;
        Ok(HostProgram {
            entry_points,
            defines: Arc::new(defines),
        })
    }

    fn entry_point(&self, program: &HostProgram, name: &str) -> Option<HostKernel> {
        if !program.entry_points.contains(name) {
            return None;
        }
        Some(HostKernel {
            name: name.to_string(),
            routine: kernels::lookup(name),
            defines: Arc::clone(&program.defines),
        })
    }

    fn preferred_group_multiple(&self, _kernel: &HostKernel) -> usize {
        HOST_GROUP_MULTIPLE
    }

    fn alloc(&self, bytes: usize) -> Result<HostBuffer, DriverError> {
        if bytes > self.max_alloc {
            return Err(DriverError::new(
                OUT_OF_MEMORY,
                format!(
                    "requested {} bytes, maximum single allocation is {}",
                    bytes, self.max_alloc
                ),
            ));
        }
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.memory.insert(id, vec![0u8; bytes]);
        Ok(HostBuffer { id, bytes })
    }

    fn free(&self, buffer: HostBuffer) {
        self.state.lock().memory.remove(&buffer.id);
    }

    fn write(&self, buffer: &HostBuffer, data: &[u8]) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        let mem = state
            .memory
            .get_mut(&buffer.id)
            .ok_or_else(|| DriverError::new(INVALID_HANDLE, "write to a freed buffer"))?;
        if data.len() > mem.len() {
            return Err(DriverError::new(
                INVALID_VALUE,
                format!("write of {} bytes into a {} byte buffer", data.len(), mem.len()),
            ));
        }
        mem[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, buffer: &HostBuffer, dest: &mut [u8]) -> Result<(), DriverError> {
        let state = self.state.lock();
        let mem = state
            .memory
            .get(&buffer.id)
            .ok_or_else(|| DriverError::new(INVALID_HANDLE, "read from a freed buffer"))?;
        if dest.len() > mem.len() {
            return Err(DriverError::new(
                INVALID_VALUE,
                format!("read of {} bytes from a {} byte buffer", dest.len(), mem.len()),
            ));
        }
        dest.copy_from_slice(&mem[..dest.len()]);
        Ok(())
    }

    fn copy(&self, src: &HostBuffer, dst: &HostBuffer, bytes: usize) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        let data = match state.memory.get(&src.id) {
            Some(mem) if mem.len() >= bytes => mem[..bytes].to_vec(),
            Some(_) => return Err(DriverError::new(INVALID_VALUE, "copy source too small")),
            None => return Err(DriverError::new(INVALID_HANDLE, "copy from a freed buffer")),
        };
        match state.memory.get_mut(&dst.id) {
            Some(mem) if mem.len() >= bytes => {
                mem[..bytes].copy_from_slice(&data);
                Ok(())
            }
            Some(_) => Err(DriverError::new(INVALID_VALUE, "copy destination too small")),
            None => Err(DriverError::new(INVALID_HANDLE, "copy into a freed buffer")),
        }
    }

    fn launch(
        &self,
        kernel: &HostKernel,
        args: &[KernelArg<'_, HostBuffer>],
        work: WorkSize,
    ) -> Result<(), DriverError> {
        if work.local == 0 || work.local > MAX_GROUP_SIZE {
            return Err(DriverError::new(
                INVALID_VALUE,
                format!("invalid group size {}", work.local),
            ));
        }
        let routine = kernel.routine.ok_or_else(|| {
            DriverError::new(NOT_FOUND, format!("no host routine for {}", kernel.name))
        })?;
        let args = args
            .iter()
            .map(|arg| match arg {
                KernelArg::Buffer(buf) => HostArg::Buffer(buf.id),
                KernelArg::Int(v) => HostArg::Int(*v),
                KernelArg::Float(v) => HostArg::Float(*v),
            })
            .collect();

        let mut state = self.state.lock();
        state.launches += 1;
        let mut invocation = Invocation::new(&kernel.defines, args, work, &mut state.memory);
        routine(&mut invocation)
    }

    fn finish(&self) -> Result<(), DriverError> {
        // Launches complete synchronously; nothing is ever in flight.
        Ok(())
    }
}

/// Parse `-DNAME=value` compiler arguments. A bare `-DNAME` defines `1`.
fn parse_flags(flags: &str) -> Result<Defines, DriverError> {
    let mut defines = Defines::new();
    for token in flags.split_whitespace() {
        if let Some(def) = token.strip_prefix("-D") {
            let (name, value) = def.split_once('=').unwrap_or((def, "1"));
            if name.is_empty() {
                return Err(DriverError::new(
                    INVALID_VALUE,
                    format!("error: empty macro name in '{}'", token),
                ));
            }
            defines.insert(name.to_string(), value.to_string());
        } else if !token.starts_with('-') {
            return Err(DriverError::new(
                INVALID_VALUE,
                format!("error: invalid compiler option '{}'", token),
            ));
        }
    }
    Ok(defines)
}

/// Fail the build on `#error` lines, reporting them like a compiler log.
fn check_error_directives(source: &str) -> Result<(), DriverError> {
    let errors: Vec<String> = source
        .lines()
        .enumerate()
        .filter_map(|(i, line)| {
            line.trim_start()
                .strip_prefix("#error")
                .map(|msg| format!("line {}: error: {}", i + 1, msg.trim()))
        })
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(DriverError::new(INVALID_SOURCE, errors.join("\n")))
    }
}

/// Names of all `__global__ void name(...)` declarations in `source`.
fn declared_entry_points(source: &str) -> HashSet<String> {
    let mut names = HashSet::new();
    let mut rest = source;
    while let Some(pos) = rest.find("__global__") {
        rest = &rest[pos + "__global__".len()..];
        let Some(after_void) = rest.trim_start().strip_prefix("void") else {
            continue;
        };
        let name: String = after_void
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if !name.is_empty() {
            names.insert(name);
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let defines = parse_flags("-DINPUT_SIZE=2048 -DNO_UNUSED_SYNAPSE -DInType=int").unwrap();
        assert_eq!(defines["INPUT_SIZE"], "2048");
        assert_eq!(defines["NO_UNUSED_SYNAPSE"], "1");
        assert_eq!(defines["InType"], "int");
        assert!(parse_flags("").unwrap().is_empty());
        assert!(parse_flags("-std=c++17").unwrap().is_empty());
        assert!(parse_flags("INPUT_SIZE=3").is_err());
        assert!(parse_flags("-D=3").is_err());
    }

    #[test]
    fn test_declared_entry_points() {
        let src = "extern \"C\" __global__ void fastTopK(const int* x) {}\n\
                   __device__ int helper() { return 0; }\n\
                   extern \"C\" __global__   void   threshold (int* y) {}\n\
                   // __global__ is mentioned here without a declaration\n";
        let names = declared_entry_points(src);
        assert_eq!(names.len(), 2);
        assert!(names.contains("fastTopK"));
        assert!(names.contains("threshold"));
    }

    #[test]
    fn test_error_directive_fails_build() {
        let driver = HostDriver::new();
        let err = driver
            .build("int a;\n#error MAX_SYNAPSE_PER_CELL undefined\n", "", &[])
            .unwrap_err();
        assert_eq!(err.code, INVALID_SOURCE);
        assert!(err.message.contains("line 2"));
        assert!(err.message.contains("MAX_SYNAPSE_PER_CELL undefined"));
        assert_eq!(driver.builds(), 0);
    }

    #[test]
    fn test_no_compiler() {
        let driver = HostDriver::new().without_compiler();
        assert!(!driver.compiler_available());
        assert!(driver.build("__global__ void k() {}", "", &[]).is_err());
    }

    #[test]
    fn test_alloc_free_and_transfer() {
        let driver = HostDriver::new().with_max_alloc(16);
        assert!(driver.alloc(17).is_err());

        let a = driver.alloc(8).unwrap();
        let b = driver.alloc(8).unwrap();
        assert_eq!(driver.live_buffers(), 2);

        driver.write(&a, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        driver.copy(&a, &b, 8).unwrap();
        let mut out = [0u8; 8];
        driver.read(&b, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);

        assert!(driver.write(&a, &[0u8; 9]).is_err());

        driver.free(a);
        driver.free(b);
        assert_eq!(driver.live_buffers(), 0);
    }

    #[test]
    fn test_launch_checks_group_size() {
        let driver = HostDriver::new();
        let program = driver
            .build("extern \"C\" __global__ void __htm_noop__(int* p) {}", "", &[])
            .unwrap();
        let kernel = driver.entry_point(&program, "__htm_noop__").unwrap();
        let buf = driver.alloc(64 * 4).unwrap();
        let args = [KernelArg::Buffer(&buf)];

        let err = driver.launch(&kernel, &args, WorkSize::new(64, 0)).unwrap_err();
        assert_eq!(err.code, INVALID_VALUE);
        assert!(driver.launch(&kernel, &args, WorkSize::new(4096, 2048)).is_err());
        driver.launch(&kernel, &args, WorkSize::new(64, 32)).unwrap();
        // Partial last group.
        driver.launch(&kernel, &args, WorkSize::new(50, 32)).unwrap();
        assert_eq!(driver.launches(), 2);
        driver.free(buf);
    }

    #[test]
    fn test_unknown_entry_point() {
        let driver = HostDriver::new();
        let program = driver.build("__global__ void present() {}", "", &[]).unwrap();
        assert!(driver.entry_point(&program, "absent").is_none());

        // Declared but without a host routine: resolves, fails at launch.
        let kernel = driver.entry_point(&program, "present").unwrap();
        let err = driver.launch(&kernel, &[], WorkSize::new(32, 32)).unwrap_err();
        assert_eq!(err.code, NOT_FOUND);
    }
}
