//! Placement of LoRA parameters on the base model's compute device.

use std::fmt;

use candle_core::{Device, DeviceLocation, Tensor};

use super::error::{LoraError, Result};

/// Memory space a tensor lives in, ignoring the device ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Cpu,
    Cuda,
    Metal,
}

impl DeviceClass {
    pub fn of(device: &Device) -> Self {
        match device.location() {
            DeviceLocation::Cpu => Self::Cpu,
            DeviceLocation::Cuda { .. } => Self::Cuda,
            DeviceLocation::Metal { .. } => Self::Metal,
        }
    }

    pub fn is_host(self) -> bool {
        self == Self::Cpu
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::Metal => write!(f, "metal"),
        }
    }
}

/// What [`resolve`] does with a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Hand the tensor back as-is.
    Reuse,
    /// Copy host memory to the target device.
    CopyToTarget,
    /// The tensor lives on a backend the target cannot read.
    Unsupported,
}

/// Placement policy for a tensor residing in `residency` bound for `target`.
///
/// CPU graphs take whatever they are given. Accelerators reuse tensors of
/// their own class and copy host tensors; anything else is rejected.
pub fn placement(target: DeviceClass, residency: DeviceClass) -> Placement {
    match (target, residency) {
        (DeviceClass::Cpu, _) => Placement::Reuse,
        (target, residency) if target == residency => Placement::Reuse,
        (_, DeviceClass::Cpu) => Placement::CopyToTarget,
        _ => Placement::Unsupported,
    }
}

/// Scoped use of a device's execution context.
///
/// Entering records a span for the work done on `device`; dropping the guard
/// synchronizes the device so any copy issued inside the scope has landed
/// before the tensor escapes. The guard releases on every exit path.
pub struct DeviceScope<'a> {
    device: &'a Device,
    _span: tracing::span::EnteredSpan,
}

impl<'a> DeviceScope<'a> {
    pub fn enter(device: &'a Device) -> Self {
        let span = tracing::debug_span!("lora_device_scope", device = ?device.location());
        Self {
            device,
            _span: span.entered(),
        }
    }
}

impl Drop for DeviceScope<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.device.synchronize() {
            tracing::warn!(error = %e, "device synchronization failed on scope exit");
        }
    }
}

/// Return a tensor usable on `target`, copying only when required.
///
/// `supplied` is never modified. The result is either `supplied` itself (a
/// cheap handle clone sharing storage) or a new tensor on `target`.
pub fn resolve(target: &Device, supplied: &Tensor) -> Result<Tensor> {
    let target_class = DeviceClass::of(target);
    if target_class.is_host() {
        return Ok(supplied.clone());
    }

    let _scope = DeviceScope::enter(target);
    let residency = DeviceClass::of(supplied.device());
    match placement(target_class, residency) {
        Placement::Reuse => Ok(supplied.clone()),
        Placement::CopyToTarget => {
            tracing::debug!(
                device = %target_class,
                dims = ?supplied.dims(),
                dtype = ?supplied.dtype(),
                "copying lora parameter to device"
            );
            Ok(supplied.to_device(target)?)
        }
        Placement::Unsupported => Err(LoraError::UnsupportedDevicePlacement {
            target: target_class,
            residency,
        }),
    }
}
