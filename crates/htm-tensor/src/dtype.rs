use std::fmt;

use half::f16;

/// Element types a tensor can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// One byte per element, zero is false.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 32-bit floating point.
    Float,
    /// 16-bit floating point (IEEE 754 half-precision, via the `half` crate).
    Half,
    /// Placeholder for an unresolved type. Never allocatable.
    Unknown,
}

impl DType {
    /// Returns the size in bytes of a single element.
    ///
    /// - Bool: 1 byte
    /// - Int32: 4 bytes
    /// - Float: 4 bytes
    /// - Half: 2 bytes (using `half::f16`)
    /// - Unknown: 0
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::Bool => 1,
            DType::Int32 => 4,
            DType::Float => 4,
            DType::Half => 2,
            DType::Unknown => 0,
        }
    }

    /// Name of the matching scalar type in device kernel source, used when a
    /// kernel is specialized on element types.
    pub fn device_type_name(&self) -> Option<&'static str> {
        match self {
            DType::Bool => Some("bool"),
            DType::Int32 => Some("int"),
            DType::Float => Some("float"),
            DType::Half => Some("half"),
            DType::Unknown => None,
        }
    }

    /// Inverse of [`DType::device_type_name`].
    pub fn from_device_type_name(name: &str) -> Option<DType> {
        match name {
            "bool" => Some(DType::Bool),
            "int" => Some(DType::Int32),
            "float" => Some(DType::Float),
            "half" => Some(DType::Half),
            _ => None,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, DType::Unknown)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::Bool => write!(f, "bool"),
            DType::Int32 => write!(f, "int32"),
            DType::Float => write!(f, "float"),
            DType::Half => write!(f, "half"),
            DType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Host scalar types that map one-to-one onto a [`DType`].
pub trait Element: Copy + Send + Sync + 'static {
    const DTYPE: DType;

    /// Serialize a host slice into the device byte layout.
    fn to_bytes(values: &[Self]) -> Vec<u8>;

    /// Deserialize device bytes. `bytes.len()` must be a multiple of the
    /// element size.
    fn from_bytes(bytes: &[u8]) -> Vec<Self>;
}

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn to_bytes(values: &[Self]) -> Vec<u8> {
        values.iter().map(|&v| v as u8).collect()
    }

    fn from_bytes(bytes: &[u8]) -> Vec<Self> {
        bytes.iter().map(|&b| b != 0).collect()
    }
}

impl Element for i32 {
    const DTYPE: DType = DType::Int32;

    fn to_bytes(values: &[Self]) -> Vec<u8> {
        bytemuck::cast_slice(values).to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Vec<Self> {
        bytemuck::pod_collect_to_vec(bytes)
    }
}

impl Element for f32 {
    const DTYPE: DType = DType::Float;

    fn to_bytes(values: &[Self]) -> Vec<u8> {
        bytemuck::cast_slice(values).to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Vec<Self> {
        bytemuck::pod_collect_to_vec(bytes)
    }
}

impl Element for f16 {
    const DTYPE: DType = DType::Half;

    fn to_bytes(values: &[Self]) -> Vec<u8> {
        bytemuck::cast_slice(values).to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Vec<Self> {
        bytemuck::pod_collect_to_vec(bytes)
    }
}
