use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("device initialization failed: {0}")]
    DeviceInit(String),
    #[error("cannot allocate {bytes} bytes on the device: {reason}")]
    Allocation { bytes: usize, reason: String },
    #[error("error building program {program}:\n{log}")]
    Compile { program: String, log: String },
    #[error("kernel {entry_point} not found in program {program}")]
    EntryPointNotFound { entry_point: String, program: String },
    #[error("{operation}: tensor does not belong to this backend")]
    BackendMismatch { operation: &'static str },
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: String, got: String },
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },
    #[error("unsupported dtype: {0}")]
    UnsupportedDType(String),
    #[error("host/device transfer failed: {0}")]
    Transfer(String),
    #[error("{operation} failed on the device. Code {code}")]
    Dispatch { operation: &'static str, code: i32 },
    #[error("cannot open file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Other(String),
}

impl TensorError {
    /// True for errors raised by operand checks: foreign tensors, wrong
    /// dtypes, incompatible shapes.
    pub fn is_type_mismatch(&self) -> bool {
        matches!(
            self,
            TensorError::BackendMismatch { .. }
                | TensorError::DTypeMismatch { .. }
                | TensorError::ShapeMismatch { .. }
                | TensorError::UnsupportedDType(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TensorError>;
