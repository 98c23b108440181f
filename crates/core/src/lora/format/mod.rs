//! Versioned binary container for LoRA parameter sets.
//!
//! ## File Format Structure
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │  Header (12 bytes)               │
//! ├──────────────────────────────────┤
//! │  - Magic (4 bytes)               │  "GAIL"
//! │  - Payload length (u64)          │  bytes following the header
//! ├──────────────────────────────────┤
//! │  Payload                         │
//! ├──────────────────────────────────┤
//! │  - Version (u32)                 │  checked against the supported range
//! │  - Parameter count (u32)         │
//! │  - Records, in order:            │
//! │      name_len (u32), name (UTF-8)│
//! │      element type (u8)           │  ONNX TensorProto numbering
//! │      rank (u8), dims (u64 each)  │
//! │      data_len (u64), data        │  row-major, little-endian elements
//! └──────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. The payload must be consumed exactly:
//! trailing bytes fail verification.

mod store;
mod writer;

pub use store::{
    has_magic, is_version_supported, AdapterFile, FormatView, ParameterRecord, Records,
};
pub use writer::{tensor_bytes, AdapterFileWriter};

use candle_core::DType;

/// Magic bytes identifying an adapter container.
pub const MAGIC: [u8; 4] = *b"GAIL";

/// Magic plus payload length.
pub const HEADER_SIZE: usize = 12;

/// Version written by [`AdapterFileWriter`].
pub const FORMAT_VERSION: u32 = 1;

/// Oldest version this build can read.
pub const MIN_SUPPORTED_VERSION: u32 = 1;

/// Newest version this build can read.
pub const MAX_SUPPORTED_VERSION: u32 = 1;

/// Upper bound on records in one container.
pub const MAX_PARAMETERS: usize = 65_536;

/// Upper bound on the byte length of a parameter name.
pub const MAX_NAME_LEN: usize = 1024;

/// Upper bound on tensor rank.
pub const MAX_RANK: usize = 8;

/// Element type of a stored parameter.
///
/// Codes follow ONNX `TensorProto.DataType` so containers produced by other
/// tooling keep their numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ElementType {
    F32 = 1,
    U8 = 2,
    I64 = 7,
    F16 = 10,
    F64 = 11,
    U32 = 12,
    BF16 = 16,
}

impl ElementType {
    /// Decode a stored element type code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::F32),
            2 => Some(Self::U8),
            7 => Some(Self::I64),
            10 => Some(Self::F16),
            11 => Some(Self::F64),
            12 => Some(Self::U32),
            16 => Some(Self::BF16),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Tensor dtype this element type materializes as.
    pub fn dtype(self) -> DType {
        match self {
            Self::F32 => DType::F32,
            Self::U8 => DType::U8,
            Self::I64 => DType::I64,
            Self::F16 => DType::F16,
            Self::F64 => DType::F64,
            Self::U32 => DType::U32,
            Self::BF16 => DType::BF16,
        }
    }

    /// Element type for a tensor dtype, if the container can store it.
    pub fn from_dtype(dtype: DType) -> Option<Self> {
        match dtype {
            DType::F32 => Some(Self::F32),
            DType::U8 => Some(Self::U8),
            DType::I64 => Some(Self::I64),
            DType::F16 => Some(Self::F16),
            DType::F64 => Some(Self::F64),
            DType::U32 => Some(Self::U32),
            DType::BF16 => Some(Self::BF16),
            _ => None,
        }
    }

    pub fn size_in_bytes(self) -> usize {
        self.dtype().size_in_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_type_codes_match_onnx() {
        assert_eq!(ElementType::F32.code(), 1);
        assert_eq!(ElementType::F16.code(), 10);
        assert_eq!(ElementType::BF16.code(), 16);
        assert_eq!(ElementType::from_code(11), Some(ElementType::F64));
        assert_eq!(ElementType::from_code(3), None);
        assert_eq!(ElementType::from_code(0), None);
    }

    #[test]
    fn element_type_dtype_mapping_is_bijective() {
        for ty in [
            ElementType::F32,
            ElementType::U8,
            ElementType::I64,
            ElementType::F16,
            ElementType::F64,
            ElementType::U32,
            ElementType::BF16,
        ] {
            assert_eq!(ElementType::from_dtype(ty.dtype()), Some(ty));
            assert_eq!(ElementType::from_code(ty.code()), Some(ty));
        }
    }

    #[test]
    fn element_sizes() {
        assert_eq!(ElementType::F32.size_in_bytes(), 4);
        assert_eq!(ElementType::BF16.size_in_bytes(), 2);
        assert_eq!(ElementType::I64.size_in_bytes(), 8);
        assert_eq!(ElementType::U8.size_in_bytes(), 1);
    }
}
