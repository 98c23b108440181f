//! A single named LoRA adapter and its parameters.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};

use super::device;
use super::error::{LoraError, Result};
use super::extract::{check_rank, extract_all};
use super::format::AdapterFile;
use super::placeholder;

/// Where a parameter's tensor came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterOrigin {
    /// Host copy extracted from an adapter container.
    Extracted,
    /// Tensor handed in by the caller; storage is shared with them.
    Supplied,
}

/// A named LoRA parameter.
///
/// The tensor is a reference-counted handle in both cases, so cloning a
/// `Parameter` never copies tensor storage.
#[derive(Debug, Clone)]
pub struct Parameter {
    name: String,
    tensor: Tensor,
    origin: ParameterOrigin,
}

impl Parameter {
    pub(crate) fn extracted(name: impl Into<String>, tensor: Tensor) -> Self {
        Self {
            name: name.into(),
            tensor,
            origin: ParameterOrigin::Extracted,
        }
    }

    fn supplied(name: impl Into<String>, tensor: Tensor) -> Self {
        Self {
            name: name.into(),
            tensor,
            origin: ParameterOrigin::Supplied,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tensor(&self) -> &Tensor {
        &self.tensor
    }

    pub fn origin(&self) -> ParameterOrigin {
        self.origin
    }
}

/// Tensor bound to one adapter slot of the inference graph.
#[derive(Debug, Clone)]
pub struct SlotBinding {
    /// Adapter that owns the slot.
    pub adapter: String,
    /// Parameter (graph input) name.
    pub parameter: String,
    /// Device-resolved parameter when active, zero-element placeholder otherwise.
    pub tensor: Tensor,
    pub active: bool,
}

/// A named set of LoRA parameters loaded from one container.
///
/// Built empty, populated by [`Adapter::load_parameters_from_file`]. The
/// first successful load fixes the adapter's declared parameter names.
/// Loading again replaces the whole parameter list but must carry exactly
/// those names; a failed load leaves the previous list in place.
#[derive(Debug, Clone, Default)]
pub struct Adapter {
    name: String,
    parameters: Vec<Parameter>,
    /// Names fixed by the first successful load.
    declared: Option<BTreeSet<String>>,
    active: bool,
    format_version: Option<u32>,
    source: Option<PathBuf>,
}

impl Adapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read, verify and extract the container at `path`, then swap the
    /// extracted parameters in.
    pub fn load_parameters_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = AdapterFile::load(path)?;
        let view = file.view();
        let parameters = extract_all(&view)?;
        if let Some(declared) = &self.declared {
            check_declared_names(&self.name, declared, &parameters)?;
        }

        if self.declared.is_none() {
            self.declared = Some(parameters.iter().map(|p| p.name.clone()).collect());
        }
        self.format_version = Some(view.version());
        self.source = Some(path.to_path_buf());
        let replaced = std::mem::replace(&mut self.parameters, parameters);

        tracing::info!(
            adapter = %self.name,
            path = %path.display(),
            parameters = self.parameters.len(),
            replaced = replaced.len(),
            "loaded lora adapter parameters"
        );
        Ok(())
    }

    /// `(name, tensor)` pairs in container order.
    ///
    /// Each call starts a fresh pass; iterating has no side effects.
    pub fn parameters(&self) -> Parameters<'_> {
        Parameters {
            inner: self.parameters.iter(),
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Replace the tensor of an existing parameter with a caller-owned one.
    ///
    /// Only names declared by the first successful load are accepted;
    /// supplying never adds a parameter.
    pub fn supply_parameter(&mut self, name: &str, tensor: Tensor) -> Result<()> {
        let unknown = || LoraError::UnknownParameter {
            adapter: self.name.clone(),
            parameter: name.to_string(),
        };
        if !self.is_declared(name) {
            return Err(unknown());
        }
        let Some(slot) = self.parameters.iter_mut().find(|p| p.name == name) else {
            return Err(unknown());
        };
        check_rank(name, tensor.dims())?;

        tracing::debug!(
            adapter = %self.name,
            parameter = name,
            dims = ?tensor.dims(),
            "caller supplied lora parameter"
        );
        *slot = Parameter::supplied(name, tensor);
        Ok(())
    }

    /// Whether `name` is one of the parameter names fixed by the first load.
    pub fn is_declared(&self, name: &str) -> bool {
        self.declared
            .as_ref()
            .is_some_and(|declared| declared.contains(name))
    }

    pub fn activate(&mut self) {
        self.active = true;
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Version of the container the current parameters came from.
    pub fn format_version(&self) -> Option<u32> {
        self.format_version
    }

    /// Path of the container the current parameters came from.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Bind every parameter slot for a graph running on `target`.
    ///
    /// Active adapters bind their real parameters (copied to `target` when
    /// needed); inactive adapters bind zero-element placeholders.
    pub fn bind(&self, target: &Device) -> Result<Vec<SlotBinding>> {
        self.parameters
            .iter()
            .map(|param| {
                let tensor = if self.active {
                    device::resolve(target, &param.tensor)?
                } else {
                    placeholder::synthesize_empty(&param.tensor, target)?
                };
                Ok(SlotBinding {
                    adapter: self.name.clone(),
                    parameter: param.name.clone(),
                    tensor,
                    active: self.active,
                })
            })
            .collect()
    }
}

/// Reject a reload whose parameter names differ from the declared set.
fn check_declared_names(
    adapter: &str,
    declared: &BTreeSet<String>,
    loaded: &[Parameter],
) -> Result<()> {
    let loaded: BTreeSet<&str> = loaded.iter().map(|p| p.name.as_str()).collect();
    let missing: Vec<String> = declared
        .iter()
        .filter(|name| !loaded.contains(name.as_str()))
        .cloned()
        .collect();
    let unexpected: Vec<String> = loaded
        .iter()
        .filter(|name| !declared.contains(**name))
        .map(|name| name.to_string())
        .collect();

    if missing.is_empty() && unexpected.is_empty() {
        return Ok(());
    }
    Err(LoraError::ParameterSetChanged {
        adapter: adapter.to_string(),
        missing,
        unexpected,
    })
}

/// Iterator returned by [`Adapter::parameters`].
#[derive(Debug, Clone)]
pub struct Parameters<'a> {
    inner: std::slice::Iter<'a, Parameter>,
}

impl<'a> Iterator for Parameters<'a> {
    type Item = (&'a str, &'a Tensor);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|p| (p.name.as_str(), &p.tensor))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Parameters<'_> {}
