//! Conversion of verified container records into host tensors.

use candle_core::{Device, Tensor};

use super::adapter::Parameter;
use super::error::{LoraError, Result};
use super::format::{FormatView, ParameterRecord};

/// Minimum rank a LoRA parameter must have for placeholder synthesis.
pub const MIN_PARAMETER_RANK: usize = 2;

/// Materialize every record of `view` as a host-resident tensor, in file order.
///
/// Either every record converts or an error is returned; callers never see a
/// partial list.
pub fn extract_all(view: &FormatView<'_>) -> Result<Vec<Parameter>> {
    let mut parameters = Vec::with_capacity(view.len());
    for record in view.records() {
        parameters.push(extract_record(&record)?);
    }

    tracing::debug!(
        origin = view.origin(),
        parameters = parameters.len(),
        "extracted lora parameters"
    );
    Ok(parameters)
}

/// Bytes needed for `shape`, or `None` on overflow. Any zero dimension makes
/// the tensor empty whatever the other dimensions are.
fn byte_size(elem_size: usize, shape: &[usize]) -> Option<usize> {
    if shape.contains(&0) {
        return Some(0);
    }
    shape
        .iter()
        .try_fold(elem_size, |acc, &dim| acc.checked_mul(dim))
}

/// Copy one record into a freshly allocated CPU tensor.
pub fn extract_record(record: &ParameterRecord<'_>) -> Result<Parameter> {
    check_rank(record.name, record.shape)?;

    let expected = byte_size(record.element_type.size_in_bytes(), record.shape)
        .ok_or_else(|| LoraError::invalid_shape(record.name, record.shape, "byte size overflows"))?;
    if expected != record.data.len() {
        return Err(LoraError::invalid_shape(
            record.name,
            record.shape,
            format!(
                "{:?} elements need {expected} bytes but the record holds {}",
                record.element_type,
                record.data.len()
            ),
        ));
    }

    let tensor = Tensor::from_raw_buffer(
        record.data,
        record.element_type.dtype(),
        record.shape,
        &Device::Cpu,
    )?;
    Ok(Parameter::extracted(record.name, tensor))
}

/// Reject shapes the placeholder algebra cannot handle.
pub(crate) fn check_rank(name: &str, shape: &[usize]) -> Result<()> {
    if shape.len() < MIN_PARAMETER_RANK {
        return Err(LoraError::invalid_shape(
            name,
            shape,
            format!("rank {} is below the minimum of {MIN_PARAMETER_RANK}", shape.len()),
        ));
    }
    Ok(())
}
