//! Owned adapter container bytes plus a verified, borrowed view over them.

use std::collections::HashSet;
use std::ops::Range;
use std::path::Path;

use crate::lora::error::{LoraError, Result};

use super::{
    ElementType, HEADER_SIZE, MAGIC, MAX_NAME_LEN, MAX_PARAMETERS, MAX_RANK,
    MAX_SUPPORTED_VERSION, MIN_SUPPORTED_VERSION,
};

/// Origin reported in errors for containers parsed from memory.
const MEMORY_ORIGIN: &str = "<memory>";

/// Whether `bytes` starts with the container magic.
pub fn has_magic(bytes: &[u8]) -> bool {
    bytes.len() >= MAGIC.len() && bytes[..MAGIC.len()] == MAGIC
}

/// Whether this build can read containers of `version`.
pub fn is_version_supported(version: u32) -> bool {
    (MIN_SUPPORTED_VERSION..=MAX_SUPPORTED_VERSION).contains(&version)
}

/// Location of one record inside the raw buffer, produced by verification.
#[derive(Debug)]
struct RecordIndex {
    name: String,
    element_type: ElementType,
    shape: Vec<usize>,
    data: Range<usize>,
}

/// An adapter container held entirely in memory.
///
/// Construction runs the full validation pipeline (magic, structural
/// verification, version range), so an `AdapterFile` is always readable
/// through [`AdapterFile::view`].
#[derive(Debug)]
pub struct AdapterFile {
    origin: String,
    buffer: Vec<u8>,
    version: u32,
    records: Vec<RecordIndex>,
}

impl AdapterFile {
    /// Read and validate the container at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let buffer = std::fs::read(path).map_err(|source| LoraError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(buffer, path.display().to_string())
    }

    /// Validate a container that is already in memory.
    pub fn from_bytes(buffer: Vec<u8>) -> Result<Self> {
        Self::parse(buffer, MEMORY_ORIGIN.to_string())
    }

    fn parse(buffer: Vec<u8>, origin: String) -> Result<Self> {
        if !has_magic(&buffer) {
            return Err(LoraError::InvalidFormat { origin });
        }

        let layout = match verify(&buffer) {
            Ok(layout) => layout,
            Err(reason) => return Err(LoraError::CorruptData { origin, reason }),
        };

        if !is_version_supported(layout.version) {
            return Err(LoraError::UnsupportedVersion {
                origin,
                version: layout.version,
                min: MIN_SUPPORTED_VERSION,
                max: MAX_SUPPORTED_VERSION,
            });
        }

        tracing::debug!(
            origin = %origin,
            version = layout.version,
            parameters = layout.records.len(),
            bytes = buffer.len(),
            "verified lora container"
        );

        Ok(Self {
            origin,
            buffer,
            version: layout.version,
            records: layout.records,
        })
    }

    /// Path (or `<memory>`) the container was read from.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Total size of the raw container in bytes.
    pub fn size_in_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn view(&self) -> FormatView<'_> {
        FormatView { file: self }
    }
}

/// Zero-copy view over a verified [`AdapterFile`].
#[derive(Debug, Clone, Copy)]
pub struct FormatView<'a> {
    file: &'a AdapterFile,
}

impl<'a> FormatView<'a> {
    pub fn version(&self) -> u32 {
        self.file.version
    }

    pub fn origin(&self) -> &'a str {
        &self.file.origin
    }

    /// Number of parameter records.
    pub fn len(&self) -> usize {
        self.file.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file.records.is_empty()
    }

    /// Records in file order.
    pub fn records(&self) -> Records<'a> {
        Records {
            buffer: &self.file.buffer,
            inner: self.file.records.iter(),
        }
    }
}

/// One serialized parameter, borrowing its bytes from the container.
#[derive(Debug, Clone, Copy)]
pub struct ParameterRecord<'a> {
    pub name: &'a str,
    pub element_type: ElementType,
    pub shape: &'a [usize],
    pub data: &'a [u8],
}

/// Iterator over the records of a [`FormatView`].
#[derive(Debug, Clone)]
pub struct Records<'a> {
    buffer: &'a [u8],
    inner: std::slice::Iter<'a, RecordIndex>,
}

impl<'a> Iterator for Records<'a> {
    type Item = ParameterRecord<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.inner.next()?;
        Some(ParameterRecord {
            name: &index.name,
            element_type: index.element_type,
            shape: &index.shape,
            data: &self.buffer[index.data.clone()],
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Records<'_> {}

struct Layout {
    version: u32,
    records: Vec<RecordIndex>,
}

/// Walk the whole buffer and check every length, code and bound.
///
/// Does not judge the version value; that is the caller's next step.
fn verify(buffer: &[u8]) -> std::result::Result<Layout, String> {
    if buffer.len() < HEADER_SIZE {
        return Err(format!(
            "buffer of {} bytes is shorter than the {HEADER_SIZE}-byte header",
            buffer.len()
        ));
    }

    let mut reader = ByteReader::new(buffer, MAGIC.len());
    let payload_len = reader.read_u64()?;
    let actual = (buffer.len() - HEADER_SIZE) as u64;
    if payload_len != actual {
        return Err(format!(
            "header declares a {payload_len}-byte payload but {actual} bytes follow it"
        ));
    }

    let version = reader.read_u32()?;
    let count = reader.read_u32()? as usize;
    if count > MAX_PARAMETERS {
        return Err(format!(
            "{count} parameter records exceed the limit of {MAX_PARAMETERS}"
        ));
    }

    let mut records = Vec::with_capacity(count);
    let mut seen = HashSet::with_capacity(count);
    for index in 0..count {
        let record =
            read_record(&mut reader).map_err(|e| format!("parameter record {index}: {e}"))?;
        if !seen.insert(record.name.clone()) {
            return Err(format!("duplicate parameter name {:?}", record.name));
        }
        records.push(record);
    }

    if reader.remaining() != 0 {
        return Err(format!("{} trailing bytes after the last record", reader.remaining()));
    }

    Ok(Layout { version, records })
}

fn read_record(reader: &mut ByteReader<'_>) -> std::result::Result<RecordIndex, String> {
    let name_len = reader.read_u32()? as usize;
    if name_len == 0 || name_len > MAX_NAME_LEN {
        return Err(format!(
            "name length {name_len} outside 1..={MAX_NAME_LEN}"
        ));
    }
    let name = std::str::from_utf8(reader.read_bytes(name_len)?)
        .map_err(|e| format!("name is not valid UTF-8: {e}"))?
        .to_string();

    let code = reader.read_u8()?;
    let element_type = ElementType::from_code(code)
        .ok_or_else(|| format!("unknown element type code {code} for {name:?}"))?;

    let rank = reader.read_u8()? as usize;
    if rank > MAX_RANK {
        return Err(format!("rank {rank} of {name:?} exceeds {MAX_RANK}"));
    }
    let mut shape = Vec::with_capacity(rank);
    for _ in 0..rank {
        let dim = reader.read_u64()?;
        let dim = usize::try_from(dim)
            .map_err(|_| format!("dimension {dim} of {name:?} exceeds platform maximum"))?;
        shape.push(dim);
    }

    let data_len = reader.read_u64()?;
    let data_len = usize::try_from(data_len)
        .map_err(|_| format!("data length {data_len} of {name:?} exceeds platform maximum"))?;
    let start = reader.position();
    reader.read_bytes(data_len)?;

    Ok(RecordIndex {
        name,
        element_type,
        shape,
        data: start..start + data_len,
    })
}

/// Bounds-checked little-endian cursor.
struct ByteReader<'a> {
    buffer: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buffer: &'a [u8], pos: usize) -> Self {
        Self { buffer, pos }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.buffer.len() - self.pos
    }

    fn read_bytes(&mut self, len: usize) -> std::result::Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or_else(|| format!("length {len} at offset {} overflows", self.pos))?;
        if end > self.buffer.len() {
            return Err(format!(
                "read of {len} bytes at offset {} runs past the end of the {}-byte buffer",
                self.pos,
                self.buffer.len()
            ));
        }
        let bytes = &self.buffer[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> std::result::Result<u8, String> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u32(&mut self) -> std::result::Result<u32, String> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.read_bytes(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn read_u64(&mut self) -> std::result::Result<u64, String> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.read_bytes(8)?);
        Ok(u64::from_le_bytes(raw))
    }
}
