use std::path::{Path, PathBuf};

use htm_tensor::{Result, TensorError};

/// Environment variable overriding [`BackendConfig::kernel_root`].
pub const KERNEL_ROOT_VAR: &str = "HTM_KERNEL_ROOT";
/// Environment variable overriding [`BackendConfig::device_ordinal`].
pub const DEVICE_ORDINAL_VAR: &str = "HTM_DEVICE_ORDINAL";

/// Settings for a [`GpuBackend`](crate::GpuBackend).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Directory holding the kernel sources (`overlap_score.cu`, ...).
    pub kernel_root: PathBuf,
    /// Which device of the first platform to open.
    pub device_ordinal: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            kernel_root: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/kernels")),
            device_ordinal: 0,
        }
    }
}

impl BackendConfig {
    /// Defaults, overridden by `HTM_KERNEL_ROOT` and `HTM_DEVICE_ORDINAL`.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = BackendConfig::default();
        if let Some(root) = var(KERNEL_ROOT_VAR) {
            config.kernel_root = PathBuf::from(root);
        }
        if let Some(ordinal) = var(DEVICE_ORDINAL_VAR) {
            config.device_ordinal = ordinal.trim().parse().map_err(|_| {
                TensorError::Other(format!(
                    "{} must be a device index, got '{}'",
                    DEVICE_ORDINAL_VAR, ordinal
                ))
            })?;
        }
        Ok(config)
    }

    pub fn with_kernel_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.kernel_root = root.into();
        self
    }

    pub fn with_device_ordinal(mut self, ordinal: usize) -> Self {
        self.device_ordinal = ordinal;
        self
    }

    /// Full path of a kernel source file.
    pub fn kernel_path(&self, file: impl AsRef<Path>) -> PathBuf {
        self.kernel_root.join(file)
    }
}
