//! Program cache keyed by caller-chosen program names.
//!
//! A program is built at most once per name for the lifetime of the cache.
//! Later requests under the same name return the cached build without looking
//! at the source or flags again, so callers must fold every parameter that
//! changes the compiled code into the name. The dispatcher does this by
//! appending a digest of the build flags.

use std::collections::HashMap;
use std::path::Path;

use htm_tensor::{Result, TensorError};
use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::driver::Driver;

struct CachedProgram<D: Driver> {
    // Kept alive for as long as its kernels may be launched.
    _program: D::Program,
    flags: String,
    kernels: HashMap<String, D::Kernel>,
}

/// Compiled programs and their resolved kernels.
///
/// The map is locked for the duration of a build, so concurrent requests for
/// the same name compile it once.
pub struct KernelCache<D: Driver> {
    programs: Mutex<HashMap<String, CachedProgram<D>>>,
}

impl<D: Driver> KernelCache<D> {
    pub fn new() -> Self {
        KernelCache {
            programs: Mutex::new(HashMap::new()),
        }
    }

    /// Build `sources` (concatenated in order) as `program_name` unless a
    /// program of that name is already cached.
    ///
    /// With `force_override` the program is always rebuilt and replaces the
    /// cached entry, including its kernels. On any failure the cache is left
    /// unchanged.
    pub fn compile_or_fetch<S: AsRef<str>>(
        &self,
        driver: &D,
        sources: &[S],
        program_name: &str,
        entry_points: &[&'static str],
        force_override: bool,
        flags: &str,
    ) -> Result<()> {
        let mut programs = self.programs.lock();
        if !force_override && is_cached(&programs, program_name, flags) {
            return Ok(());
        }

        let source = sources.iter().map(|s| s.as_ref()).collect::<Vec<&str>>().concat();
        debug!("building program {} with flags '{}'", program_name, flags);
        let program =
            driver
                .build(&source, flags, entry_points)
                .map_err(|e| TensorError::Compile {
                    program: program_name.to_string(),
                    log: e.message,
                })?;

        let mut kernels = HashMap::with_capacity(entry_points.len());
        for &name in entry_points {
            let kernel = driver.entry_point(&program, name).ok_or_else(|| {
                TensorError::EntryPointNotFound {
                    entry_point: name.to_string(),
                    program: program_name.to_string(),
                }
            })?;
            kernels.insert(name.to_string(), kernel);
        }

        programs.insert(
            program_name.to_string(),
            CachedProgram {
                _program: program,
                flags: flags.to_string(),
                kernels,
            },
        );
        Ok(())
    }

    /// Like [`compile_or_fetch`](Self::compile_or_fetch) with the sources read
    /// from `paths`. Files are only read when a build is needed.
    pub fn compile_from_file<P: AsRef<Path>>(
        &self,
        driver: &D,
        paths: &[P],
        program_name: &str,
        entry_points: &[&'static str],
        force_override: bool,
        flags: &str,
    ) -> Result<()> {
        if !force_override && is_cached(&self.programs.lock(), program_name, flags) {
            return Ok(());
        }
        let sources = paths
            .iter()
            .map(|path| {
                let path = path.as_ref();
                std::fs::read_to_string(path).map_err(|source| TensorError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            })
            .collect::<Result<Vec<String>>>()?;
        self.compile_or_fetch(
            driver,
            &sources,
            program_name,
            entry_points,
            force_override,
            flags,
        )
    }

    /// Build a single-kernel program and return that kernel.
    pub fn compile_kernel(
        &self,
        driver: &D,
        source: &str,
        program_name: &str,
        entry_point: &'static str,
        force_override: bool,
        flags: &str,
    ) -> Result<D::Kernel> {
        self.compile_or_fetch(
            driver,
            &[source],
            program_name,
            &[entry_point],
            force_override,
            flags,
        )?;
        self.kernel(program_name, entry_point)
    }

    /// Kernel `entry_point` of a previously compiled `program_name`.
    pub fn kernel(&self, program_name: &str, entry_point: &str) -> Result<D::Kernel> {
        self.programs
            .lock()
            .get(program_name)
            .and_then(|p| p.kernels.get(entry_point))
            .cloned()
            .ok_or_else(|| TensorError::EntryPointNotFound {
                entry_point: entry_point.to_string(),
                program: program_name.to_string(),
            })
    }

    pub fn exists(&self, program_name: &str, entry_point: &str) -> bool {
        self.programs
            .lock()
            .get(program_name)
            .is_some_and(|p| p.kernels.contains_key(entry_point))
    }

    /// Number of cached programs.
    pub fn len(&self) -> usize {
        self.programs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.lock().is_empty()
    }

    /// Names of all cached programs, sorted.
    pub fn program_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.programs.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl<D: Driver> Default for KernelCache<D> {
    fn default() -> Self {
        Self::new()
    }
}

fn is_cached<D: Driver>(
    programs: &HashMap<String, CachedProgram<D>>,
    program_name: &str,
    flags: &str,
) -> bool {
    match programs.get(program_name) {
        Some(cached) => {
            if cached.flags != flags {
                warn!(
                    "program {} was built with flags '{}', ignoring '{}'",
                    program_name, cached.flags, flags
                );
            } else {
                trace!("program {} served from cache", program_name);
            }
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostDriver;

    const SRC_A: &str = "extern \"C\" __global__ void first(int* p) {}";
    const SRC_B: &str = "extern \"C\" __global__ void second(int* p) {}";

    #[test]
    fn test_compile_once_per_name() {
        let driver = HostDriver::new();
        let cache = KernelCache::new();

        cache
            .compile_or_fetch(&driver, &[SRC_A], "prog", &["first"], false, "-DN=1")
            .unwrap();
        assert_eq!(driver.builds(), 1);

        // Different source and flags under the same name: served from cache.
        cache
            .compile_or_fetch(&driver, &[SRC_B], "prog", &["second"], false, "-DN=2")
            .unwrap();
        assert_eq!(driver.builds(), 1);
        assert!(cache.exists("prog", "first"));
        assert!(!cache.exists("prog", "second"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_force_override_rebuilds() {
        let driver = HostDriver::new();
        let cache = KernelCache::new();

        cache
            .compile_or_fetch(&driver, &[SRC_A], "prog", &["first"], false, "")
            .unwrap();
        cache
            .compile_or_fetch(&driver, &[SRC_B], "prog", &["second"], true, "")
            .unwrap();
        assert_eq!(driver.builds(), 2);
        assert!(cache.exists("prog", "second"));
        assert!(!cache.exists("prog", "first"));

        cache
            .compile_or_fetch(&driver, &[SRC_A], "prog", &["first"], true, "")
            .unwrap();
        assert_eq!(driver.builds(), 3);
        assert!(cache.exists("prog", "first"));
    }

    #[test]
    fn test_sources_are_concatenated() {
        let driver = HostDriver::new();
        let cache = KernelCache::new();
        cache
            .compile_or_fetch(
                &driver,
                &[SRC_A, "\n", SRC_B],
                "both",
                &["first", "second"],
                false,
                "",
            )
            .unwrap();
        assert!(cache.exists("both", "first"));
        assert!(cache.exists("both", "second"));
        assert_eq!(cache.program_names(), vec!["both".to_string()]);
    }

    #[test]
    fn test_compile_error_carries_log() {
        let driver = HostDriver::new();
        let cache = KernelCache::new();
        let err = cache
            .compile_or_fetch(&driver, &["#error boom"], "broken", &["k"], false, "")
            .unwrap_err();
        match err {
            TensorError::Compile { program, log } => {
                assert_eq!(program, "broken");
                assert!(log.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(cache.is_empty());
    }

    #[test]
    fn test_missing_entry_point() {
        let driver = HostDriver::new();
        let cache = KernelCache::new();
        let err = cache
            .compile_or_fetch(&driver, &[SRC_A], "prog", &["first", "missing"], false, "")
            .unwrap_err();
        match err {
            TensorError::EntryPointNotFound {
                entry_point,
                program,
            } => {
                assert_eq!(entry_point, "missing");
                assert_eq!(program, "prog");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!cache.exists("prog", "first"));
        assert!(cache.kernel("prog", "first").is_err());
    }

    #[test]
    fn test_compile_kernel_returns_kernel() {
        let driver = HostDriver::new();
        let cache = KernelCache::new();
        assert!(cache
            .compile_kernel(&driver, SRC_A, "single", "first", false, "")
            .is_ok());
        assert!(cache.kernel("single", "first").is_ok());
    }

    #[test]
    fn test_compile_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("first.cu");
        std::fs::write(&path, SRC_A).unwrap();

        let driver = HostDriver::new();
        let cache = KernelCache::new();
        cache
            .compile_from_file(&driver, &[&path], "from_file", &["first"], false, "")
            .unwrap();
        assert!(cache.exists("from_file", "first"));

        // Cached: the file is not read again.
        std::fs::remove_file(&path).unwrap();
        cache
            .compile_from_file(&driver, &[&path], "from_file", &["first"], false, "")
            .unwrap();
        assert_eq!(driver.builds(), 1);

        // Forced: the missing file is reported with its path.
        let err = cache
            .compile_from_file(&driver, &[&path], "from_file", &["first"], true, "")
            .unwrap_err();
        match err {
            TensorError::Io { path: p, .. } => assert_eq!(p, path),
            other => panic!("unexpected error: {other}"),
        }
        assert!(cache.exists("from_file", "first"));
    }
}
