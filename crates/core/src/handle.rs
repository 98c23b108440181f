//! Handle-based surface consumed by host-language bindings.
//!
//! Bindings hold an [`AdaptersHandle`] as an opaque pointer and translate
//! [`ResultCode`] into their own error convention; the message of the most
//! recent failure stays available through [`AdaptersHandle::last_error`].

use std::path::Path;

use candle_core::Device;

use crate::lora::{AdapterRegistry, LoraError};

/// Uniform status returned across the binding boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ResultCode {
    Ok = 0,
    IoError = 1,
    InvalidFormat = 2,
    CorruptData = 3,
    UnsupportedVersion = 4,
    InvalidShape = 5,
    UnsupportedDevicePlacement = 6,
    DuplicateAdapterName = 7,
    UnknownAdapter = 8,
    UnknownParameter = 9,
    TensorError = 10,
    EncodeError = 11,
    ParameterSetChanged = 12,
}

impl ResultCode {
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl LoraError {
    /// Status code reported to bindings for this error.
    pub fn code(&self) -> ResultCode {
        match self {
            Self::Io { .. } => ResultCode::IoError,
            Self::InvalidFormat { .. } => ResultCode::InvalidFormat,
            Self::CorruptData { .. } => ResultCode::CorruptData,
            Self::UnsupportedVersion { .. } => ResultCode::UnsupportedVersion,
            Self::InvalidShape { .. } => ResultCode::InvalidShape,
            Self::UnsupportedDevicePlacement { .. } => ResultCode::UnsupportedDevicePlacement,
            Self::DuplicateAdapterName(_) => ResultCode::DuplicateAdapterName,
            Self::UnknownAdapter(_) => ResultCode::UnknownAdapter,
            Self::UnknownParameter { .. } => ResultCode::UnknownParameter,
            Self::Tensor(_) => ResultCode::TensorError,
            Self::Encode(_) => ResultCode::EncodeError,
            Self::ParameterSetChanged { .. } => ResultCode::ParameterSetChanged,
        }
    }
}

/// Opaque owner of one model's adapter registry.
pub struct AdaptersHandle {
    registry: AdapterRegistry,
    last_error: Option<String>,
}

/// Create an empty adapter set for a model running on `device`.
pub fn create_adapters(device: Device) -> Box<AdaptersHandle> {
    Box::new(AdaptersHandle {
        registry: AdapterRegistry::new(device),
        last_error: None,
    })
}

impl AdaptersHandle {
    pub fn load_adapter(&mut self, name: &str, path: impl AsRef<Path>) -> ResultCode {
        let result = self.registry.load(name, path);
        self.record(result)
    }

    pub fn unload_adapter(&mut self, name: &str) -> ResultCode {
        let result = self.registry.unload(name);
        self.record(result)
    }

    /// Message of the most recent failed call, cleared by the next success.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Release the handle and every adapter it holds.
    pub fn destroy(self: Box<Self>) {
        tracing::debug!(adapters = self.registry.len(), "destroying adapters handle");
    }

    fn record(&mut self, result: Result<(), LoraError>) -> ResultCode {
        match result {
            Ok(()) => {
                self.last_error = None;
                ResultCode::Ok
            }
            Err(e) => {
                let code = e.code();
                let status = code as i32;
                tracing::warn!(status, error = %e, "adapter call failed");
                self.last_error = Some(e.to_string());
                code
            }
        }
    }
}
