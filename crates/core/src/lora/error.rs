//! Errors raised while loading, placing and registering LoRA adapters.

use std::path::PathBuf;

use thiserror::Error;

use super::device::DeviceClass;

/// Result alias used throughout the adapter subsystem.
pub type Result<T> = std::result::Result<T, LoraError>;

/// Errors that can occur anywhere in the adapter subsystem.
///
/// Every variant aborts only the operation that produced it; registry and
/// adapter state are left exactly as they were before the call.
#[derive(Debug, Error)]
pub enum LoraError {
    #[error("failed to read adapter file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{origin}: does not appear to be a valid lora parameter container")]
    InvalidFormat { origin: String },
    #[error("{origin}: fails container verification: {reason}")]
    CorruptData { origin: String, reason: String },
    #[error("{origin}: unsupported lora format version {version} (supported {min}..={max})")]
    UnsupportedVersion {
        origin: String,
        version: u32,
        min: u32,
        max: u32,
    },
    #[error("invalid shape {shape:?} for parameter {name}: {reason}")]
    InvalidShape {
        name: String,
        shape: Vec<usize>,
        reason: String,
    },
    #[error("lora parameter resides on unsupported device {residency} for target {target}")]
    UnsupportedDevicePlacement {
        target: DeviceClass,
        residency: DeviceClass,
    },
    #[error("adapter name already in use: {0}")]
    DuplicateAdapterName(String),
    #[error("adapter not found: {0}")]
    UnknownAdapter(String),
    #[error("adapter {adapter:?} has no parameter named {parameter}")]
    UnknownParameter { adapter: String, parameter: String },
    #[error(
        "adapter {adapter:?} must keep its declared parameters \
         (missing {missing:?}, unexpected {unexpected:?})"
    )]
    ParameterSetChanged {
        adapter: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    #[error("cannot encode lora container: {0}")]
    Encode(String),
    #[error("tensor operation failed: {0}")]
    Tensor(#[from] candle_core::Error),
}

impl LoraError {
    pub(crate) fn invalid_shape(
        name: impl Into<String>,
        shape: &[usize],
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidShape {
            name: name.into(),
            shape: shape.to_vec(),
            reason: reason.into(),
        }
    }
}
