use thiserror::Error;

use crate::gguf::quant::GgufTensorType;

#[derive(Error, Debug)]
pub enum GgufError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid magic number: expected 0x46554747, got 0x{0:08X}")]
    BadMagic(u32),

    #[error("Unsupported GGUF version: {0}")]
    UnsupportedVersion(u32),

    #[error("Read of {needed} bytes at offset {offset} exceeds buffer length {len}")]
    OutOfBounds {
        offset: usize,
        needed: usize,
        len: usize,
    },

    #[error("String length {len} exceeds maximum {max}")]
    OversizedString { len: u64, max: u64 },

    #[error("Array length {len} exceeds maximum {max}")]
    OversizedArray { len: u64, max: u64 },

    #[error("Invalid UTF-8 in string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("Unknown metadata value type: {0}")]
    UnknownValueType(u32),

    #[error("Unknown tensor element type: {0}")]
    UnknownElementType(u32),

    #[error("No quantization codec for tensor type {0}")]
    UnsupportedCodec(GgufTensorType),

    #[error("Shape mismatch: shape holds {expected} elements, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Block data mismatch: expected {expected} bytes, got {actual}")]
    BlockCountMismatch { expected: usize, actual: usize },

    #[error("Malformed GGUF: {0}")]
    Malformed(String),

    #[error("Missing required metadata key: {0}")]
    MissingKey(String),

    #[error("Tensor not found: {0}")]
    TensorNotFound(String),

    #[error("Invalid tensor name pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}
