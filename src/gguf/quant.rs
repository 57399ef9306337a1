// Tensor element types, block geometry and the half-precision primitives
// shared by every codec.

use serde::{Serialize, Serializer};

use crate::error::GgufError;
use super::q4k;

// ---------------------------------------------------------------------------
// GGML tensor type IDs (matches ggml_type enum in ggml.h)
// ---------------------------------------------------------------------------

/// Tensor element types recognised in GGUF tensor descriptors.
///
/// The discriminant values match the GGML type IDs. Every listed type can be
/// *sized*; only the unquantized floats and Q4_K can be encoded or decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum GgufTensorType {
    F32 = 0,
    F16 = 1,
    Q4_0 = 2,
    Q4_1 = 3,
    // Q4_2 = 4 (removed)
    // Q4_3 = 5 (removed)
    Q5_0 = 6,
    Q5_1 = 7,
    Q8_0 = 8,
    Q8_1 = 9,
    Q2K = 10,
    Q3K = 11,
    Q4K = 12,
    Q5K = 13,
    Q6K = 14,
    Q8K = 15,
    IQ2XXS = 16,
    IQ2XS = 17,
    IQ3XXS = 18,
    IQ1S = 19,
    IQ4NL = 20,
    IQ3S = 21,
    IQ2S = 22,
    IQ4XS = 23,
    I8 = 24,
    I16 = 25,
    I32 = 26,
    I64 = 27,
    F64 = 28,
    IQ1M = 29,
    BF16 = 30,
    // 31..=33 were Q4_0 repacks, since removed
    TQ1_0 = 34,
    TQ2_0 = 35,
    MXFP4 = 39,
}

impl GgufTensorType {
    /// Every registered type, in ID order.
    pub const ALL: [GgufTensorType; 32] = [
        Self::F32,
        Self::F16,
        Self::Q4_0,
        Self::Q4_1,
        Self::Q5_0,
        Self::Q5_1,
        Self::Q8_0,
        Self::Q8_1,
        Self::Q2K,
        Self::Q3K,
        Self::Q4K,
        Self::Q5K,
        Self::Q6K,
        Self::Q8K,
        Self::IQ2XXS,
        Self::IQ2XS,
        Self::IQ3XXS,
        Self::IQ1S,
        Self::IQ4NL,
        Self::IQ3S,
        Self::IQ2S,
        Self::IQ4XS,
        Self::I8,
        Self::I16,
        Self::I32,
        Self::I64,
        Self::F64,
        Self::IQ1M,
        Self::BF16,
        Self::TQ1_0,
        Self::TQ2_0,
        Self::MXFP4,
    ];

    /// Convert a raw u32 from a tensor descriptor into a `GgufTensorType`.
    pub fn from_u32(v: u32) -> Result<Self, GgufError> {
        match v {
            0 => Ok(Self::F32),
            1 => Ok(Self::F16),
            2 => Ok(Self::Q4_0),
            3 => Ok(Self::Q4_1),
            6 => Ok(Self::Q5_0),
            7 => Ok(Self::Q5_1),
            8 => Ok(Self::Q8_0),
            9 => Ok(Self::Q8_1),
            10 => Ok(Self::Q2K),
            11 => Ok(Self::Q3K),
            12 => Ok(Self::Q4K),
            13 => Ok(Self::Q5K),
            14 => Ok(Self::Q6K),
            15 => Ok(Self::Q8K),
            16 => Ok(Self::IQ2XXS),
            17 => Ok(Self::IQ2XS),
            18 => Ok(Self::IQ3XXS),
            19 => Ok(Self::IQ1S),
            20 => Ok(Self::IQ4NL),
            21 => Ok(Self::IQ3S),
            22 => Ok(Self::IQ2S),
            23 => Ok(Self::IQ4XS),
            24 => Ok(Self::I8),
            25 => Ok(Self::I16),
            26 => Ok(Self::I32),
            27 => Ok(Self::I64),
            28 => Ok(Self::F64),
            29 => Ok(Self::IQ1M),
            30 => Ok(Self::BF16),
            34 => Ok(Self::TQ1_0),
            35 => Ok(Self::TQ2_0),
            39 => Ok(Self::MXFP4),
            _ => Err(GgufError::UnknownElementType(v)),
        }
    }

    /// The wire ID of this type.
    pub fn id(self) -> u32 {
        self as u32
    }

    /// Number of elements per quantization block.
    ///
    /// For non-quantized types (F32, F16, etc.) the block size is 1.
    pub fn block_size(self) -> usize {
        match self {
            Self::F32 | Self::F16 | Self::BF16 | Self::F64 => 1,
            Self::I8 | Self::I16 | Self::I32 | Self::I64 => 1,
            Self::Q4_0 | Self::Q4_1 | Self::Q5_0 | Self::Q5_1 => 32,
            Self::Q8_0 | Self::Q8_1 | Self::IQ4NL | Self::MXFP4 => 32,
            // K-quant super-blocks use 256 elements
            Self::Q2K | Self::Q3K | Self::Q4K | Self::Q5K | Self::Q6K | Self::Q8K => QK_K,
            Self::IQ2XXS
            | Self::IQ2XS
            | Self::IQ3XXS
            | Self::IQ1S
            | Self::IQ3S
            | Self::IQ2S
            | Self::IQ4XS
            | Self::IQ1M
            | Self::TQ1_0
            | Self::TQ2_0 => QK_K,
        }
    }

    /// Size in bytes of one quantization block.
    ///
    /// For non-quantized types this is the size of a single element.
    pub fn type_size(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F16 => 2,
            Self::BF16 => 2,
            Self::F64 => 8,
            Self::I8 => 1,
            Self::I16 => 2,
            Self::I32 => 4,
            Self::I64 => 8,
            Self::Q4_0 => 2 + 16,
            Self::Q4_1 => 2 * 2 + 16,
            Self::Q5_0 => 2 + 4 + 16,
            Self::Q5_1 => 2 * 2 + 4 + 16,
            Self::Q8_0 => 2 + 32,
            Self::Q8_1 => 2 * 2 + 32,
            // K-quant sizes (QK_K = 256)
            Self::Q2K => 2 * 2 + QK_K / 16 + QK_K / 4,         // 84
            Self::Q3K => 2 + QK_K / 4 + QK_K / 8 + 12,         // 110
            Self::Q4K => q4k::BLOCK_BYTES,                     // 144
            Self::Q5K => 2 * 2 + 12 + QK_K / 8 + QK_K / 2,     // 176
            Self::Q6K => 2 + QK_K / 16 + 3 * QK_K / 4,         // 210
            Self::Q8K => 4 + QK_K + QK_K / 16 * 2,             // 292
            Self::IQ2XXS => 2 + QK_K / 8 * 2,                  // 66
            Self::IQ2XS => 2 + QK_K / 8 * 2 + QK_K / 32,       // 74
            Self::IQ3XXS => 2 + 3 * QK_K / 8,                  // 98
            Self::IQ1S => 2 + QK_K / 8 + QK_K / 16,            // 50
            Self::IQ4NL => 2 + 16,                             // 18
            Self::IQ3S => 2 + QK_K / 4 + QK_K / 32 + QK_K / 8 + QK_K / 64, // 110
            Self::IQ2S => 2 + QK_K / 4 + QK_K / 32 + QK_K / 32, // 82
            Self::IQ4XS => 2 + 2 + QK_K / 64 + QK_K / 2,       // 136
            Self::IQ1M => QK_K / 8 + QK_K / 16 + QK_K / 32,    // 56
            Self::TQ1_0 => 2 + QK_K / 64 + (QK_K - 4 * QK_K / 64) / 5, // 54
            Self::TQ2_0 => 2 + QK_K / 4,                       // 66
            Self::MXFP4 => 1 + 16,                             // 17
        }
    }

    /// True for block formats (anything with more than one element per block).
    pub fn is_quantized(self) -> bool {
        self.block_size() > 1
    }

    /// True if [`encode`] / [`decode`] support this type.
    pub fn has_codec(self) -> bool {
        matches!(self, Self::F32 | Self::F16 | Self::BF16 | Self::Q4K)
    }

    /// Human-readable name for the tensor type.
    pub fn name(self) -> &'static str {
        match self {
            Self::F32 => "F32",
            Self::F16 => "F16",
            Self::Q4_0 => "Q4_0",
            Self::Q4_1 => "Q4_1",
            Self::Q5_0 => "Q5_0",
            Self::Q5_1 => "Q5_1",
            Self::Q8_0 => "Q8_0",
            Self::Q8_1 => "Q8_1",
            Self::Q2K => "Q2_K",
            Self::Q3K => "Q3_K",
            Self::Q4K => "Q4_K",
            Self::Q5K => "Q5_K",
            Self::Q6K => "Q6_K",
            Self::Q8K => "Q8_K",
            Self::IQ2XXS => "IQ2_XXS",
            Self::IQ2XS => "IQ2_XS",
            Self::IQ3XXS => "IQ3_XXS",
            Self::IQ1S => "IQ1_S",
            Self::IQ4NL => "IQ4_NL",
            Self::IQ3S => "IQ3_S",
            Self::IQ2S => "IQ2_S",
            Self::IQ4XS => "IQ4_XS",
            Self::I8 => "I8",
            Self::I16 => "I16",
            Self::I32 => "I32",
            Self::I64 => "I64",
            Self::F64 => "F64",
            Self::IQ1M => "IQ1_M",
            Self::BF16 => "BF16",
            Self::TQ1_0 => "TQ1_0",
            Self::TQ2_0 => "TQ2_0",
            Self::MXFP4 => "MXFP4",
        }
    }
}

impl std::fmt::Display for GgufTensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for GgufTensorType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Number of elements per K-quant super-block.
pub const QK_K: usize = 256;

// ---------------------------------------------------------------------------
// Sizing
// ---------------------------------------------------------------------------

/// Number of logical elements described by `shape`.
///
/// An empty shape is a scalar (one element). Overflow is reported rather
/// than wrapped.
pub fn element_count(shape: &[u64]) -> Result<u64, GgufError> {
    shape.iter().try_fold(1u64, |acc, &d| {
        acc.checked_mul(d).ok_or_else(|| {
            GgufError::Malformed(format!("element count of shape {:?} overflows u64", shape))
        })
    })
}

/// [`element_count`] as a `usize`, failing when it does not fit the target's
/// address space.
pub fn element_count_usize(shape: &[u64]) -> Result<usize, GgufError> {
    let n = element_count(shape)?;
    usize::try_from(n).map_err(|_| {
        GgufError::Malformed(format!("element count {} of shape {:?} exceeds usize", n, shape))
    })
}

/// Bytes needed to store `n_elements` values of `dtype`:
/// `ceil(n_elements / block_size) * type_size`.
pub fn byte_size_for_elements(dtype: GgufTensorType, n_elements: u64) -> Result<u64, GgufError> {
    let bs = dtype.block_size() as u64;
    let ts = dtype.type_size() as u64;
    n_elements.div_ceil(bs).checked_mul(ts).ok_or_else(|| {
        GgufError::Malformed(format!(
            "{} elements of {} overflow the byte size",
            n_elements, dtype
        ))
    })
}

/// Bytes needed to store a tensor of the given shape and type.
///
/// Pure function of its inputs; sizing never requires a codec.
pub fn tensor_byte_size(shape: &[u64], dtype: GgufTensorType) -> Result<u64, GgufError> {
    byte_size_for_elements(dtype, element_count(shape)?)
}

// ---------------------------------------------------------------------------
// IEEE 754 half-precision (f16) conversion
// ---------------------------------------------------------------------------

/// Convert a 16-bit IEEE 754 half-precision float to a 32-bit float.
///
/// Bit layout of f16:
///   - 1 bit sign
///   - 5 bits exponent (bias 15)
///   - 10 bits mantissa
///
/// Exponent 0 is zero/subnormal, exponent 31 is infinity/NaN. Every f16
/// value is exactly representable in f32.
pub fn f16_to_f32(bits: u16) -> f32 {
    half::f16::from_bits(bits).to_f32()
}

/// Convert a 32-bit float to 16-bit IEEE 754 half-precision bits.
///
/// Rounds to nearest (ties to even). Values beyond the f16 range become a
/// signed infinity, values below half the smallest subnormal become a signed
/// zero, and NaN stays NaN (max exponent, nonzero mantissa).
pub fn f32_to_f16(value: f32) -> u16 {
    half::f16::from_f32(value).to_bits()
}

/// Convert bfloat16 bits to f32.
pub fn bf16_to_f32(bits: u16) -> f32 {
    half::bf16::from_bits(bits).to_f32()
}

/// Convert an f32 to bfloat16 bits (round to nearest even).
pub fn f32_to_bf16(value: f32) -> u16 {
    half::bf16::from_f32(value).to_bits()
}

// ---------------------------------------------------------------------------
// Codec dispatch
// ---------------------------------------------------------------------------

/// Encode `values` (whose logical shape is `shape`) into the on-disk layout
/// of `dtype`.
///
/// Supported: F32, F16, BF16 and Q4_K. Every other registered type returns
/// [`GgufError::UnsupportedCodec`].
pub fn encode(dtype: GgufTensorType, values: &[f32], shape: &[u64]) -> Result<Vec<u8>, GgufError> {
    match dtype {
        GgufTensorType::Q4K => Ok(q4k::quantize(values, shape)?.0),
        GgufTensorType::F32 | GgufTensorType::F16 | GgufTensorType::BF16 => {
            check_shape(values.len(), shape)?;
            let mut out = Vec::with_capacity(values.len() * dtype.type_size());
            for &v in values {
                match dtype {
                    GgufTensorType::F32 => out.extend_from_slice(&v.to_le_bytes()),
                    GgufTensorType::F16 => out.extend_from_slice(&f32_to_f16(v).to_le_bytes()),
                    _ => out.extend_from_slice(&f32_to_bf16(v).to_le_bytes()),
                }
            }
            Ok(out)
        }
        other => Err(GgufError::UnsupportedCodec(other)),
    }
}

/// Decode `n_elements` values of `dtype` from `data`.
///
/// `data` must be exactly the size the registry computes for `n_elements`.
pub fn decode(dtype: GgufTensorType, data: &[u8], n_elements: usize) -> Result<Vec<f32>, GgufError> {
    if !dtype.has_codec() {
        return Err(GgufError::UnsupportedCodec(dtype));
    }
    let expected = byte_size_for_elements(dtype, n_elements as u64)?;
    let expected = usize::try_from(expected).map_err(|_| {
        GgufError::Malformed(format!("{} bytes of {} exceed usize", expected, dtype))
    })?;
    if data.len() != expected {
        return Err(GgufError::BlockCountMismatch {
            expected,
            actual: data.len(),
        });
    }
    let values = match dtype {
        GgufTensorType::F32 => data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        GgufTensorType::F16 => data
            .chunks_exact(2)
            .map(|c| f16_to_f32(u16::from_le_bytes([c[0], c[1]])))
            .collect(),
        GgufTensorType::BF16 => data
            .chunks_exact(2)
            .map(|c| bf16_to_f32(u16::from_le_bytes([c[0], c[1]])))
            .collect(),
        _ => {
            let n_blocks = data.len() / q4k::BLOCK_BYTES;
            q4k::dequantize(data, n_blocks, &[n_elements as u64])?
        }
    };
    Ok(values)
}

fn check_shape(actual: usize, shape: &[u64]) -> Result<(), GgufError> {
    let expected = element_count_usize(shape)?;
    if expected != actual {
        return Err(GgufError::ShapeMismatch { expected, actual });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
