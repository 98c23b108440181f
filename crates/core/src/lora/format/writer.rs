//! Serialization of named tensors into the adapter container.

use std::path::Path;

use candle_core::{DType, Tensor};

use crate::lora::error::{LoraError, Result};

use super::{ElementType, FORMAT_VERSION, MAGIC, MAX_NAME_LEN, MAX_PARAMETERS, MAX_RANK};

#[derive(Debug)]
struct PendingRecord {
    name: String,
    element_type: ElementType,
    shape: Vec<usize>,
    data: Vec<u8>,
}

/// Builds adapter container bytes record by record.
///
/// Names, ranks and the record count are bounded by the layout limits when a
/// record is pushed. Nothing else is validated, so the writer can also
/// produce containers the reader will reject (rank-1 parameters, mismatched
/// byte counts, unsupported versions).
#[derive(Debug)]
pub struct AdapterFileWriter {
    version: u32,
    records: Vec<PendingRecord>,
}

impl Default for AdapterFileWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterFileWriter {
    pub fn new() -> Self {
        Self {
            version: FORMAT_VERSION,
            records: Vec::new(),
        }
    }

    /// Override the version stamped into the payload.
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Append a record from raw little-endian element bytes.
    pub fn push_raw(
        &mut self,
        name: impl Into<String>,
        element_type: ElementType,
        shape: &[usize],
        data: Vec<u8>,
    ) -> Result<&mut Self> {
        let name = name.into();
        if name.len() > MAX_NAME_LEN {
            return Err(LoraError::Encode(format!(
                "name of {} bytes exceeds {MAX_NAME_LEN}",
                name.len()
            )));
        }
        if shape.len() > MAX_RANK {
            return Err(LoraError::Encode(format!(
                "rank {} of {name:?} exceeds {MAX_RANK}",
                shape.len()
            )));
        }
        if self.records.len() >= MAX_PARAMETERS {
            return Err(LoraError::Encode(format!(
                "container already holds {MAX_PARAMETERS} records"
            )));
        }

        self.records.push(PendingRecord {
            name,
            element_type,
            shape: shape.to_vec(),
            data,
        });
        Ok(self)
    }

    /// Append a record holding a copy of `tensor`'s contents.
    pub fn push_tensor(&mut self, name: impl Into<String>, tensor: &Tensor) -> Result<&mut Self> {
        let element_type = ElementType::from_dtype(tensor.dtype()).ok_or_else(|| {
            LoraError::Tensor(candle_core::Error::Msg(format!(
                "dtype {:?} cannot be stored in a lora container",
                tensor.dtype()
            )))
        })?;
        let data = tensor_bytes(tensor)?;
        self.push_raw(name, element_type, tensor.dims(), data)
    }

    /// Number of records queued.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // Counts, name lengths and ranks fit their fields: push_raw bounds them.
        let mut payload = Vec::new();
        payload.extend_from_slice(&self.version.to_le_bytes());
        payload.extend_from_slice(&(self.records.len() as u32).to_le_bytes());
        for record in &self.records {
            payload.extend_from_slice(&(record.name.len() as u32).to_le_bytes());
            payload.extend_from_slice(record.name.as_bytes());
            payload.push(record.element_type.code());
            payload.push(record.shape.len() as u8);
            for &dim in &record.shape {
                payload.extend_from_slice(&(dim as u64).to_le_bytes());
            }
            payload.extend_from_slice(&(record.data.len() as u64).to_le_bytes());
            payload.extend_from_slice(&record.data);
        }

        let mut bytes = Vec::with_capacity(super::HEADER_SIZE + payload.len());
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&payload);
        bytes
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_bytes()).map_err(|source| LoraError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Raw little-endian bytes of a tensor's elements in row-major order.
pub fn tensor_bytes(tensor: &Tensor) -> Result<Vec<u8>> {
    let flat = tensor.flatten_all()?;
    let bytes = match flat.dtype() {
        DType::U8 => flat.to_vec1::<u8>()?,
        DType::U32 => le_bytes(flat.to_vec1::<u32>()?, u32::to_le_bytes),
        DType::I64 => le_bytes(flat.to_vec1::<i64>()?, i64::to_le_bytes),
        DType::F16 => le_bytes(flat.to_vec1::<half::f16>()?, half::f16::to_le_bytes),
        DType::BF16 => le_bytes(flat.to_vec1::<half::bf16>()?, half::bf16::to_le_bytes),
        DType::F32 => le_bytes(flat.to_vec1::<f32>()?, f32::to_le_bytes),
        DType::F64 => le_bytes(flat.to_vec1::<f64>()?, f64::to_le_bytes),
        other => {
            return Err(LoraError::Tensor(candle_core::Error::Msg(format!(
                "no byte encoding for dtype {other:?}"
            ))))
        }
    };
    Ok(bytes)
}

fn le_bytes<T, const N: usize>(values: Vec<T>, encode: fn(T) -> [u8; N]) -> Vec<u8> {
    values.into_iter().flat_map(encode).collect()
}
