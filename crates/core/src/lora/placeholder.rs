//! Zero-element stand-ins for the parameters of inactive adapters.
//!
//! The inference graph has a fixed set of LoRA inputs. When an adapter is
//! not active its inputs are still bound, to tensors with the right rank and
//! dtype whose rank dimension is zero, so the low-rank product contributes
//! nothing.

use candle_core::{DType, Device, Tensor};

use super::error::Result;
use super::extract::check_rank;

/// Backing storage shared by every placeholder. Never written.
static EMPTY_INPUT: [u8; 0] = [];

/// Shape of the placeholder for a parameter of shape `dims`.
///
/// Of the last two dimensions the smaller one (the LoRA rank) becomes zero;
/// on a tie the last dimension is zeroed.
pub fn empty_dims(dims: &[usize]) -> Result<Vec<usize>> {
    check_rank("<placeholder reference>", dims)?;

    let mut shape = dims.to_vec();
    let last = shape.len() - 1;
    let penultimate = last - 1;
    if shape[last] <= shape[penultimate] {
        shape[last] = 0;
    } else {
        shape[penultimate] = 0;
    }
    Ok(shape)
}

/// Placeholder of the given dtype for a reference shape, placed on `device`.
pub fn synthesize_empty_for(dims: &[usize], dtype: DType, device: &Device) -> Result<Tensor> {
    let shape = empty_dims(dims)?;
    Ok(Tensor::from_raw_buffer(&EMPTY_INPUT, dtype, &shape, device)?)
}

/// Placeholder matching `reference`'s rank and dtype, placed on `device`.
pub fn synthesize_empty(reference: &Tensor, device: &Device) -> Result<Tensor> {
    synthesize_empty_for(reference.dims(), reference.dtype(), device)
}
