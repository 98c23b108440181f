//! LoRA (Low-Rank Adaptation) adapter loading and activation.
//!
//! Adapters arrive as versioned binary containers ([`format`]), are turned
//! into host tensors ([`extract`]), placed on the model's device on demand
//! ([`device`]) and kept in a name-keyed [`AdapterRegistry`]. Slots of
//! inactive adapters are bound to zero-element placeholders
//! ([`placeholder`]) so the inference graph keeps a fixed set of inputs.

mod adapter;
mod config;
pub mod device;
mod error;
pub mod extract;
pub mod format;
pub mod placeholder;
mod registry;

pub use adapter::{Adapter, Parameter, ParameterOrigin, Parameters, SlotBinding};
pub use config::{AdapterEntry, AdapterListConfig, ConfigError};
pub use device::{resolve, DeviceClass, DeviceScope, Placement};
pub use error::{LoraError, Result};
pub use format::{AdapterFile, AdapterFileWriter, FormatView, ParameterRecord};
pub use placeholder::synthesize_empty;
pub use registry::{AdapterMap, AdapterRegistry};
