// GGUF container parser: header, KV metadata, tensor info, data section.

pub mod cursor;
pub mod metadata;
pub mod q4k;
pub mod quant;
pub mod tensor;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::GgufError;
use cursor::ByteCursor;
use metadata::{GgufValue, Metadata};
use quant::GgufTensorType;
use tensor::GgufTensor;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// GGUF magic number: ASCII "GGUF" as a little-endian u32.
pub const GGUF_MAGIC: u32 = 0x4655_4747;

/// Oldest GGUF version we accept. Version 1 used u32 counts and is not read.
pub const GGUF_MIN_VERSION: u32 = 2;

/// Newest GGUF version we accept.
pub const GGUF_MAX_VERSION: u32 = 3;

/// Default alignment for the data section (bytes).
pub const GGUF_DEFAULT_ALIGNMENT: usize = 32;

/// Metadata key that overrides the data-section alignment.
pub const KEY_ALIGNMENT: &str = "general.alignment";

/// Metadata key naming the model architecture.
pub const KEY_ARCHITECTURE: &str = "general.architecture";

/// Smallest possible KV entry: empty key (u64 len) + type tag + 1-byte value.
const MIN_KV_SIZE: usize = 8 + 4 + 1;

/// Smallest possible tensor info: empty name + n_dims + dtype + offset.
const MIN_TENSOR_INFO_SIZE: usize = 8 + 4 + 4 + 8;

/// Tensor-name fragments excluded from the dominant-quantization tally.
const NON_WEIGHT_MARKERS: [&str; 3] = ["embd", "embed", "output"];

// ---------------------------------------------------------------------------
// ParseOptions
// ---------------------------------------------------------------------------

/// Defensive limits and tunables for [`GgufDocument::parse_with`].
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Longest accepted string (keys, tensor names, string values).
    pub max_string_len: u64,
    /// Longest accepted metadata array.
    pub max_array_len: u64,
    /// Deepest accepted array-of-array nesting.
    pub max_array_depth: usize,
    /// Largest accepted declared tensor count.
    pub max_tensors: u64,
    /// Largest accepted declared metadata count.
    pub max_metadata: u64,
    /// Largest accepted tensor rank.
    pub max_dims: u32,
    /// Data-section alignment when the file does not override it.
    pub default_alignment: usize,
    /// Let a `general.alignment` u32 entry override `default_alignment`.
    pub honor_alignment_key: bool,
    /// Require every tensor's data to lie inside the buffer.
    pub verify_tensor_bounds: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_string_len: cursor::MAX_STRING_LEN,
            max_array_len: 100_000_000,
            max_array_depth: 16,
            max_tensors: 1_000_000,
            max_metadata: 10_000_000,
            max_dims: 8,
            default_alignment: GGUF_DEFAULT_ALIGNMENT,
            honor_alignment_key: true,
            verify_tensor_bounds: true,
        }
    }
}

// ---------------------------------------------------------------------------
// TensorInfo
// ---------------------------------------------------------------------------

/// Information about a single tensor stored in a GGUF file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TensorInfo {
    /// Tensor name (e.g. "blk.0.attn_q.weight").
    pub name: String,
    /// Number of dimensions.
    pub n_dims: u32,
    /// Size along each dimension, as stored. Length == n_dims.
    pub dims: Vec<u64>,
    /// Data type (quantization format).
    pub dtype: GgufTensorType,
    /// Byte offset relative to the data section start, as stored.
    pub offset: u64,
    /// Byte offset from the start of the buffer.
    pub absolute_offset: u64,
    /// Byte size of this tensor's data, derived from `dims` and `dtype`.
    pub byte_size: u64,
}

impl TensorInfo {
    /// Total number of elements in the tensor. A rank-0 tensor has one.
    pub fn n_elements(&self) -> u64 {
        quant::element_count(&self.dims).unwrap_or(u64::MAX)
    }

    /// Layer index parsed from a `<prefix>.<index>.<rest>` name.
    ///
    /// The first all-digit segment that has at least one segment on each
    /// side wins: `blk.3.attn_q.weight` and `model.layers.3.mlp.up` both give
    /// 3; `output.weight` and `blk.3` give `None`.
    pub fn layer_index(&self) -> Option<usize> {
        let segments: Vec<&str> = self.name.split('.').collect();
        if segments.len() < 3 {
            return None;
        }
        segments[1..segments.len() - 1]
            .iter()
            .find(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|s| s.parse().ok())
    }

    /// Absolute byte range of this tensor's data.
    pub fn data_range(&self) -> std::ops::Range<u64> {
        self.absolute_offset..self.absolute_offset.saturating_add(self.byte_size)
    }
}

// ---------------------------------------------------------------------------
// GgufDocument
// ---------------------------------------------------------------------------

/// A parsed GGUF header.
///
/// Built by one forward pass over an in-memory buffer and immutable
/// afterwards. The document does not own the buffer; use
/// [`GgufDocument::tensor_bytes`] or [`MappedGguf`] to reach tensor data.
#[derive(Debug, Clone, PartialEq)]
pub struct GgufDocument {
    version: u32,
    metadata: Metadata,
    tensor_infos: Vec<TensorInfo>,
    /// Absolute offset where the tensor data section starts.
    data_offset: u64,
    alignment: usize,
    declared_tensor_count: u64,
    declared_metadata_count: u64,
    source_len: usize,
    dominant_quantization: Option<GgufTensorType>,
}

impl GgufDocument {
    // -- Construction -------------------------------------------------------

    /// Parse a GGUF buffer with default [`ParseOptions`].
    pub fn parse(buf: &[u8]) -> Result<Self, GgufError> {
        Self::parse_with(buf, &ParseOptions::default())
    }

    /// Parse a GGUF buffer.
    ///
    /// Any failure aborts the whole parse; there is no partial document.
    pub fn parse_with(buf: &[u8], opts: &ParseOptions) -> Result<Self, GgufError> {
        let mut cur = ByteCursor::new(buf);

        // ---- Magic ----
        let magic = cur.read_u32()?;
        if magic != GGUF_MAGIC {
            return Err(GgufError::BadMagic(magic));
        }

        // ---- Version ----
        let version = cur.read_u32()?;
        if !(GGUF_MIN_VERSION..=GGUF_MAX_VERSION).contains(&version) {
            return Err(GgufError::UnsupportedVersion(version));
        }
        info!("GGUF version {}", version);

        // ---- Tensor and KV counts ----
        let n_tensors = cur.read_u64()?;
        let n_kv = cur.read_u64()?;
        check_count("n_tensors", n_tensors, opts.max_tensors, MIN_TENSOR_INFO_SIZE, &cur)?;
        check_count("n_kv", n_kv, opts.max_metadata, MIN_KV_SIZE, &cur)?;
        info!("n_tensors: {}, n_kv: {}", n_tensors, n_kv);

        // ---- KV pairs ----
        let mut metadata = Metadata::with_capacity(n_kv as usize);
        for i in 0..n_kv {
            let (key, value) = metadata::read_entry(&mut cur, opts)?;
            debug!("KV[{}]: {} = {}", i, key, value.type_name());
            if metadata.insert(key, value).is_some() {
                debug!("KV[{}] overwrote an earlier entry", i);
            }
        }

        // ---- Alignment ----
        let alignment = resolve_alignment(&metadata, opts)?;
        debug!("alignment: {} bytes", alignment);

        // ---- Tensor info ----
        let mut tensor_infos = Vec::with_capacity(n_tensors as usize);
        for i in 0..n_tensors {
            let name = cur.read_string_capped(opts.max_string_len)?;
            let n_dims = cur.read_u32()?;
            if n_dims > opts.max_dims {
                return Err(GgufError::Malformed(format!(
                    "tensor '{}' has {} dimensions (max {})",
                    name, n_dims, opts.max_dims
                )));
            }
            let mut dims = Vec::with_capacity(n_dims as usize);
            for _ in 0..n_dims {
                dims.push(cur.read_u64()?);
            }
            let dtype = GgufTensorType::from_u32(cur.read_u32()?)?;
            let offset = cur.read_u64()?;
            let byte_size = quant::tensor_byte_size(&dims, dtype)?;

            debug!(
                "tensor[{}]: {} shape={:?} dtype={} offset={} size={}",
                i, name, dims, dtype, offset, byte_size
            );
            tensor_infos.push(TensorInfo {
                name,
                n_dims,
                dims,
                dtype,
                offset,
                absolute_offset: 0,
                byte_size,
            });
        }

        // ---- Data section offset ----
        let header_end = cur.position();
        let data_offset = cur.align(alignment)? as u64;
        info!(
            "data section starts at offset {} (header ended at {})",
            data_offset, header_end
        );

        for info in &mut tensor_infos {
            if info.offset % alignment as u64 != 0 {
                return Err(GgufError::Malformed(format!(
                    "tensor '{}' offset {} is not a multiple of alignment {}",
                    info.name, info.offset, alignment
                )));
            }
            info.absolute_offset = data_offset.checked_add(info.offset).ok_or_else(|| {
                GgufError::Malformed(format!("tensor '{}' offset overflows", info.name))
            })?;
            if opts.verify_tensor_bounds {
                check_in_bounds(info, buf.len())?;
            }
        }

        let dominant_quantization = dominant_quantization(&tensor_infos);
        if let Some(t) = dominant_quantization {
            debug!("dominant quantization: {}", t);
        }

        Ok(GgufDocument {
            version,
            metadata,
            tensor_infos,
            data_offset,
            alignment,
            declared_tensor_count: n_tensors,
            declared_metadata_count: n_kv,
            source_len: buf.len(),
            dominant_quantization,
        })
    }

    // -- Header -------------------------------------------------------------

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Absolute byte offset where the tensor data section starts.
    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    /// Alignment (in bytes) used for the data section.
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Tensor count from the header (always equal to `n_tensors()`).
    pub fn declared_tensor_count(&self) -> u64 {
        self.declared_tensor_count
    }

    /// KV count from the header. May exceed `n_metadata()` when keys repeat.
    pub fn declared_metadata_count(&self) -> u64 {
        self.declared_metadata_count
    }

    /// Length of the buffer this document was parsed from.
    pub fn source_len(&self) -> usize {
        self.source_len
    }

    /// The element type with the largest byte footprint, ignoring
    /// embedding and output tensors. Descriptive only.
    pub fn dominant_quantization(&self) -> Option<GgufTensorType> {
        self.dominant_quantization
    }

    // -- Metadata getters ---------------------------------------------------

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Number of distinct KV metadata entries.
    pub fn n_metadata(&self) -> usize {
        self.metadata.len()
    }

    /// Get a raw metadata value by key.
    pub fn get(&self, key: &str) -> Option<&GgufValue> {
        self.metadata.get(key)
    }

    /// Get a string metadata value.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(GgufValue::as_str)
    }

    /// Get a u32 metadata value.
    pub fn get_u32(&self, key: &str) -> Option<u32> {
        match self.metadata.get(key) {
            Some(GgufValue::U32(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get an i32 metadata value.
    pub fn get_i32(&self, key: &str) -> Option<i32> {
        match self.metadata.get(key) {
            Some(GgufValue::I32(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get a u64 metadata value.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.metadata.get(key) {
            Some(GgufValue::U64(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get an f32 metadata value.
    pub fn get_f32(&self, key: &str) -> Option<f32> {
        match self.metadata.get(key) {
            Some(GgufValue::F32(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get a bool metadata value.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.metadata.get(key) {
            Some(GgufValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get a string array metadata value.
    pub fn get_str_array(&self, key: &str) -> Option<Vec<&str>> {
        self.metadata
            .get(key)?
            .as_array()?
            .iter()
            .map(GgufValue::as_str)
            .collect()
    }

    /// Get an f32 array metadata value.
    pub fn get_f32_array(&self, key: &str) -> Option<Vec<f32>> {
        self.metadata
            .get(key)?
            .as_array()?
            .iter()
            .map(|v| match v {
                GgufValue::F32(x) => Some(*x),
                _ => None,
            })
            .collect()
    }

    /// Get a required string value, returning an error if missing.
    pub fn require_str(&self, key: &str) -> Result<&str, GgufError> {
        self.get_str(key)
            .ok_or_else(|| GgufError::MissingKey(key.to_string()))
    }

    /// Get a required u32 value, returning an error if missing.
    pub fn require_u32(&self, key: &str) -> Result<u32, GgufError> {
        self.get_u32(key)
            .ok_or_else(|| GgufError::MissingKey(key.to_string()))
    }

    /// The `general.architecture` string, if present.
    pub fn architecture(&self) -> Option<&str> {
        self.get_str(KEY_ARCHITECTURE)
    }

    // -- Tensor queries -----------------------------------------------------

    /// Get all tensor info entries, in file order.
    pub fn tensor_infos(&self) -> &[TensorInfo] {
        &self.tensor_infos
    }

    /// Number of tensors in the file.
    pub fn n_tensors(&self) -> usize {
        self.tensor_infos.len()
    }

    /// Find a tensor by name. The first match wins if names repeat.
    pub fn tensor(&self, name: &str) -> Option<&TensorInfo> {
        self.tensor_infos.iter().find(|t| t.name == name)
    }

    /// Find a tensor by name, returning an error if not found.
    pub fn require_tensor(&self, name: &str) -> Result<&TensorInfo, GgufError> {
        self.tensor(name)
            .ok_or_else(|| GgufError::TensorNotFound(name.to_string()))
    }

    /// Tensors whose name matches the regular expression `pattern`.
    pub fn tensors_matching(&self, pattern: &str) -> Result<Vec<&TensorInfo>, GgufError> {
        let re = Regex::new(pattern)?;
        Ok(self.tensors_matching_regex(&re))
    }

    /// Tensors whose name matches `re`, in file order.
    pub fn tensors_matching_regex(&self, re: &Regex) -> Vec<&TensorInfo> {
        self.tensor_infos
            .iter()
            .filter(|t| re.is_match(&t.name))
            .collect()
    }

    /// Tensors bucketed by [`TensorInfo::layer_index`]. Tensors without a
    /// layer index are left out.
    pub fn group_by_layer_index(&self) -> BTreeMap<usize, Vec<&TensorInfo>> {
        let mut groups: BTreeMap<usize, Vec<&TensorInfo>> = BTreeMap::new();
        for info in &self.tensor_infos {
            if let Some(layer) = info.layer_index() {
                groups.entry(layer).or_default().push(info);
            }
        }
        groups
    }

    /// Number of distinct layer indices among tensor names.
    pub fn layer_count(&self) -> usize {
        self.group_by_layer_index().len()
    }

    /// Sum of every tensor's byte size, saturating at `u64::MAX`.
    pub fn total_tensor_bytes(&self) -> u64 {
        self.tensor_infos
            .iter()
            .fold(0u64, |acc, t| acc.saturating_add(t.byte_size))
    }

    // -- Tensor data access -------------------------------------------------

    /// Slice a tensor's bytes out of `buf`, the buffer this document was
    /// parsed from.
    pub fn tensor_bytes<'a>(&self, buf: &'a [u8], name: &str) -> Result<&'a [u8], GgufError> {
        let info = self.require_tensor(name)?;
        check_in_bounds(info, buf.len())?;
        let range = info.data_range();
        Ok(&buf[range.start as usize..range.end as usize])
    }

    /// A typed view over a tensor's bytes in `buf`.
    pub fn tensor_view<'a>(&self, buf: &'a [u8], name: &str) -> Result<GgufTensor<'a>, GgufError> {
        let info = self.require_tensor(name)?;
        let data = self.tensor_bytes(buf, name)?;
        Ok(GgufTensor::new(info, data))
    }

    // -- Summary ------------------------------------------------------------

    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            version: self.version,
            architecture: self.architecture().map(str::to_owned),
            tensor_count: self.tensor_infos.len(),
            metadata_count: self.metadata.len(),
            data_offset: self.data_offset,
            alignment: self.alignment,
            dominant_quantization: self.dominant_quantization,
            total_tensor_bytes: self.total_tensor_bytes(),
            layer_count: self.layer_count(),
            source_len: self.source_len,
        }
    }
}

/// Headline numbers for a parsed document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub version: u32,
    pub architecture: Option<String>,
    pub tensor_count: usize,
    pub metadata_count: usize,
    pub data_offset: u64,
    pub alignment: usize,
    pub dominant_quantization: Option<GgufTensorType>,
    pub total_tensor_bytes: u64,
    pub layer_count: usize,
    pub source_len: usize,
}

// ---------------------------------------------------------------------------
// MappedGguf
// ---------------------------------------------------------------------------

/// A GGUF file memory-mapped from disk together with its parsed header.
///
/// Tensor data is accessed zero-copy from the mapping.
pub struct MappedGguf {
    document: GgufDocument,
    mmap: memmap2::Mmap,
}

impl MappedGguf {
    /// Open and parse a GGUF file with default [`ParseOptions`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GgufError> {
        Self::open_with(path, &ParseOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, opts: &ParseOptions) -> Result<Self, GgufError> {
        let path = path.as_ref();
        info!("opening GGUF file: {}", path.display());

        let file = File::open(path)?;

        // SAFETY: The file remains open for the lifetime of the Mmap. We do
        // not modify the file while it is mapped. External modifications are
        // undefined behaviour, but we accept this (same as llama.cpp).
        let mmap = unsafe { memmap2::MmapOptions::new().map(&file)? };

        let document = GgufDocument::parse_with(&mmap, opts)?;
        Ok(Self { document, mmap })
    }

    pub fn document(&self) -> &GgufDocument {
        &self.document
    }

    /// Raw bytes of a tensor by name (zero-copy from mmap).
    pub fn tensor_data(&self, name: &str) -> Result<&[u8], GgufError> {
        self.document.tensor_bytes(&self.mmap, name)
    }

    /// Typed view of a tensor by name.
    pub fn tensor(&self, name: &str) -> Result<GgufTensor<'_>, GgufError> {
        self.document.tensor_view(&self.mmap, name)
    }

    /// Views of every tensor, in file order.
    pub fn tensors(&self) -> Result<Vec<GgufTensor<'_>>, GgufError> {
        self.document
            .tensor_infos()
            .iter()
            .map(|info| self.tensor(&info.name))
            .collect()
    }

    /// The full mapped file contents.
    pub fn bytes(&self) -> &[u8] {
        &self.mmap
    }
}

impl std::fmt::Debug for MappedGguf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedGguf")
            .field("n_metadata", &self.document.n_metadata())
            .field("n_tensors", &self.document.n_tensors())
            .field("data_offset", &self.document.data_offset())
            .field("alignment", &self.document.alignment())
            .field("file_size", &self.mmap.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Parse helpers
// ---------------------------------------------------------------------------

/// Reject a declared count above `max`, or one whose smallest encoding
/// cannot fit in the remaining bytes.
fn check_count(
    what: &str,
    count: u64,
    max: u64,
    min_item_size: usize,
    cur: &ByteCursor<'_>,
) -> Result<(), GgufError> {
    if count > max {
        return Err(GgufError::Malformed(format!(
            "{} {} exceeds maximum {}",
            what, count, max
        )));
    }
    let needed = (count as usize).saturating_mul(min_item_size);
    if needed > cur.remaining() {
        return Err(GgufError::OutOfBounds {
            offset: cur.position(),
            needed,
            len: cur.len(),
        });
    }
    Ok(())
}

fn resolve_alignment(metadata: &Metadata, opts: &ParseOptions) -> Result<usize, GgufError> {
    if !opts.honor_alignment_key {
        return Ok(opts.default_alignment);
    }
    match metadata.get(KEY_ALIGNMENT) {
        Some(GgufValue::U32(a)) => {
            let a = *a;
            if !a.is_power_of_two() {
                return Err(GgufError::Malformed(format!(
                    "alignment {} is not a power of 2",
                    a
                )));
            }
            Ok(a as usize)
        }
        Some(other) => {
            warn!(
                "ignoring {} of type {}, expected U32",
                KEY_ALIGNMENT,
                other.type_name()
            );
            Ok(opts.default_alignment)
        }
        None => Ok(opts.default_alignment),
    }
}

fn check_in_bounds(info: &TensorInfo, len: usize) -> Result<(), GgufError> {
    let end = info.absolute_offset.checked_add(info.byte_size);
    if end.map_or(true, |end| end > len as u64) {
        return Err(GgufError::OutOfBounds {
            offset: usize::try_from(info.absolute_offset).unwrap_or(usize::MAX),
            needed: usize::try_from(info.byte_size).unwrap_or(usize::MAX),
            len,
        });
    }
    Ok(())
}

/// Sum byte sizes per element type, skipping embedding/output tensors, and
/// return the largest. Ties go to the type seen first.
fn dominant_quantization(infos: &[TensorInfo]) -> Option<GgufTensorType> {
    let mut totals: Vec<(GgufTensorType, u64)> = Vec::new();
    for info in infos {
        if NON_WEIGHT_MARKERS.iter().any(|m| info.name.contains(m)) {
            continue;
        }
        match totals.iter_mut().find(|(t, _)| *t == info.dtype) {
            Some((_, total)) => *total = total.saturating_add(info.byte_size),
            None => totals.push((info.dtype, info.byte_size)),
        }
    }
    let mut best: Option<(GgufTensorType, u64)> = None;
    for (t, total) in totals {
        if best.map_or(true, |(_, b)| total > b) {
            best = Some((t, total));
        }
    }
    best.map(|(t, _)| t)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
