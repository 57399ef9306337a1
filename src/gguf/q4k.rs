// Q4_K super-block codec: 256 f32 values <-> 144 bytes.

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::error::GgufError;
use super::quant::{element_count_usize, f16_to_f32, f32_to_f16, QK_K};

/// Bytes per Q4_K super-block.
pub const BLOCK_BYTES: usize = 2 * 2 + K_SCALE_SIZE + QK_K / 2;

/// Size of the packed scale/min array.
pub const K_SCALE_SIZE: usize = 12;

/// Sub-blocks per super-block.
pub const SUB_BLOCKS: usize = QK_K / SUB_BLOCK_LEN;

/// Elements per sub-block.
pub const SUB_BLOCK_LEN: usize = 32;

const _: () = assert!(BLOCK_BYTES == 144);

/// One Q4_K super-block.
///
/// Layout on disk:
/// `d: f16 | dmin: f16 | scales: [u8; 12] | qs: [u8; 128]` = 144 bytes.
///
/// Element `i` of sub-block `s` decodes to
/// `d * scale[s] * q[i] - dmin * min[s]`, with 6-bit `scale`/`min` codes and
/// 4-bit `q` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockQ4K {
    /// Scale of the sub-block scales, as f16 bits.
    pub d: u16,
    /// Scale of the sub-block mins, as f16 bits.
    pub dmin: u16,
    /// 8 six-bit scale codes and 8 six-bit min codes, packed.
    pub scales: [u8; K_SCALE_SIZE],
    /// 256 four-bit element codes, packed two per byte.
    pub qs: [u8; QK_K / 2],
}

impl BlockQ4K {
    /// A block whose every element decodes to zero.
    pub const ZERO: BlockQ4K = BlockQ4K {
        d: 0,
        dmin: 0,
        scales: [0; K_SCALE_SIZE],
        qs: [0; QK_K / 2],
    };

    /// Quantize one super-block of 256 values.
    ///
    /// Each 32-element sub-block gets its own scale `(max - min) / 15` and
    /// min offset `-min`. The offset is clamped to zero when the sub-block's
    /// minimum is positive, so such sub-blocks decode shifted down by their
    /// minimum. Decoders rely on this layout, so it is kept as is.
    pub fn encode(x: &[f32; QK_K]) -> Self {
        let mut sub_scales = [0.0f32; SUB_BLOCKS];
        let mut sub_mins = [0.0f32; SUB_BLOCKS];
        let mut codes = [0u8; QK_K];

        for (s, window) in x.chunks_exact(SUB_BLOCK_LEN).enumerate() {
            let min = window.iter().copied().fold(f32::INFINITY, f32::min);
            let max = window.iter().copied().fold(f32::NEG_INFINITY, f32::max);

            let range = max - min;
            let scale = if range > 0.0 { range / 15.0 } else { 0.0 };
            sub_scales[s] = scale;
            sub_mins[s] = if min < 0.0 { -min } else { 0.0 };

            if scale > 0.0 {
                for (l, &v) in window.iter().enumerate() {
                    codes[s * SUB_BLOCK_LEN + l] = nearest_code((v - min) / scale, 15);
                }
            }
        }

        let max_scale = sub_scales.iter().copied().fold(0.0f32, f32::max);
        let max_min = sub_mins.iter().copied().fold(0.0f32, f32::max);
        let d = max_scale / 63.0;
        let dmin = max_min / 63.0;

        let mut scale_codes = [0u8; SUB_BLOCKS];
        let mut min_codes = [0u8; SUB_BLOCKS];
        for s in 0..SUB_BLOCKS {
            if d > 0.0 {
                scale_codes[s] = nearest_code(sub_scales[s] / d, 63);
            }
            if dmin > 0.0 {
                min_codes[s] = nearest_code(sub_mins[s] / dmin, 63);
            }
        }

        BlockQ4K {
            d: f32_to_f16(d),
            dmin: f32_to_f16(dmin),
            scales: pack_scale_mins(&scale_codes, &min_codes),
            qs: pack_nibbles(&codes),
        }
    }

    /// Dequantize this block into 256 values.
    pub fn decode(&self) -> [f32; QK_K] {
        let d = f16_to_f32(self.d);
        let dmin = f16_to_f32(self.dmin);
        let codes = unpack_nibbles(&self.qs);

        let mut out = [0.0f32; QK_K];
        for s in 0..SUB_BLOCKS {
            let (sc, m) = get_scale_min_k4(s, &self.scales);
            let scale = d * sc as f32;
            let min = dmin * m as f32;
            let range = s * SUB_BLOCK_LEN..(s + 1) * SUB_BLOCK_LEN;
            for (o, &q) in out[range.clone()].iter_mut().zip(&codes[range]) {
                *o = scale * q as f32 - min;
            }
        }
        out
    }

    /// The 6-bit (scale, min) codes of sub-block `j`.
    pub fn scale_min(&self, j: usize) -> (u8, u8) {
        get_scale_min_k4(j, &self.scales)
    }

    pub fn from_bytes(bytes: &[u8; BLOCK_BYTES]) -> Self {
        let mut scales = [0u8; K_SCALE_SIZE];
        scales.copy_from_slice(&bytes[4..4 + K_SCALE_SIZE]);
        let mut qs = [0u8; QK_K / 2];
        qs.copy_from_slice(&bytes[4 + K_SCALE_SIZE..]);
        BlockQ4K {
            d: u16::from_le_bytes([bytes[0], bytes[1]]),
            dmin: u16::from_le_bytes([bytes[2], bytes[3]]),
            scales,
            qs,
        }
    }

    pub fn to_bytes(&self) -> [u8; BLOCK_BYTES] {
        let mut out = [0u8; BLOCK_BYTES];
        out[0..2].copy_from_slice(&self.d.to_le_bytes());
        out[2..4].copy_from_slice(&self.dmin.to_le_bytes());
        out[4..4 + K_SCALE_SIZE].copy_from_slice(&self.scales);
        out[4 + K_SCALE_SIZE..].copy_from_slice(&self.qs);
        out
    }
}

/// Round a non-negative ratio to the nearest integer code in `[0, max]`.
///
/// NaN maps to 0.
#[inline]
fn nearest_code(v: f32, max: u8) -> u8 {
    v.round().clamp(0.0, max as f32) as u8
}

// ---------------------------------------------------------------------------
// Bit packing
// ---------------------------------------------------------------------------

/// Pack eight 6-bit scale codes and eight 6-bit min codes into 12 bytes.
///
/// Bytes 0..4 hold the low 6 bits of scales 0..3 with the top 2 bits of
/// scales 4..7 in bits 6..8. Bytes 4..8 do the same for the mins. Bytes
/// 8..12 hold the low nibbles of scales 4..7 (low half) and mins 4..7
/// (high half).
pub fn pack_scale_mins(scales: &[u8; SUB_BLOCKS], mins: &[u8; SUB_BLOCKS]) -> [u8; K_SCALE_SIZE] {
    let mut out = [0u8; K_SCALE_SIZE];
    for j in 0..4 {
        out[j] = (scales[j] & 63) | ((scales[j + 4] >> 4) << 6);
        out[j + 4] = (mins[j] & 63) | ((mins[j + 4] >> 4) << 6);
        out[j + 8] = (scales[j + 4] & 0xF) | ((mins[j + 4] & 0xF) << 4);
    }
    out
}

/// Extract the 6-bit (scale, min) pair of sub-block `j` from the packed array.
#[inline]
pub fn get_scale_min_k4(j: usize, scales: &[u8; K_SCALE_SIZE]) -> (u8, u8) {
    if j < 4 {
        (scales[j] & 63, scales[j + 4] & 63)
    } else {
        (
            (scales[j + 4] & 0xF) | ((scales[j - 4] >> 6) << 4),
            (scales[j + 4] >> 4) | ((scales[j] >> 6) << 4),
        )
    }
}

/// Pack 256 four-bit codes into 128 bytes.
///
/// Codes are taken in 64-element chunks; within a chunk, element `l` goes to
/// the low nibble and element `l + 32` to the high nibble of byte `l`.
pub fn pack_nibbles(codes: &[u8; QK_K]) -> [u8; QK_K / 2] {
    let mut qs = [0u8; QK_K / 2];
    for (chunk, out) in codes.chunks_exact(64).zip(qs.chunks_exact_mut(32)) {
        for l in 0..32 {
            out[l] = (chunk[l] & 0xF) | ((chunk[l + 32] & 0xF) << 4);
        }
    }
    qs
}

/// Inverse of [`pack_nibbles`].
pub fn unpack_nibbles(qs: &[u8; QK_K / 2]) -> [u8; QK_K] {
    let mut codes = [0u8; QK_K];
    for (bytes, chunk) in qs.chunks_exact(32).zip(codes.chunks_exact_mut(64)) {
        for l in 0..32 {
            chunk[l] = bytes[l] & 0xF;
            chunk[l + 32] = bytes[l] >> 4;
        }
    }
    codes
}

// ---------------------------------------------------------------------------
// Tensor-level codec
// ---------------------------------------------------------------------------

/// Quantize a tensor to Q4_K.
///
/// `values.len()` must equal the element count of `shape`. The input is
/// zero-padded to a multiple of 256. Returns the packed bytes and the number
/// of blocks.
pub fn quantize(values: &[f32], shape: &[u64]) -> Result<(Vec<u8>, usize), GgufError> {
    let expected = element_count_usize(shape)?;
    if values.len() != expected {
        return Err(GgufError::ShapeMismatch {
            expected,
            actual: values.len(),
        });
    }

    let n_blocks = values.len().div_ceil(QK_K);
    let mut out = Vec::with_capacity(n_blocks * BLOCK_BYTES);
    for chunk in values.chunks(QK_K) {
        let mut x = [0.0f32; QK_K];
        x[..chunk.len()].copy_from_slice(chunk);
        out.extend_from_slice(&BlockQ4K::encode(&x).to_bytes());
    }
    debug!("quantized {} values into {} Q4_K blocks", values.len(), n_blocks);
    Ok((out, n_blocks))
}

/// Dequantize `n_blocks` Q4_K blocks and truncate to the element count of
/// `shape`.
pub fn dequantize(data: &[u8], n_blocks: usize, shape: &[u64]) -> Result<Vec<f32>, GgufError> {
    let n = check_blocks(data, n_blocks, shape)?;
    let mut out = Vec::with_capacity(n_blocks * QK_K);
    for raw in data.chunks_exact(BLOCK_BYTES) {
        out.extend_from_slice(&decode_raw(raw));
    }
    out.truncate(n);
    Ok(out)
}

/// Same as [`dequantize`], decoding blocks in parallel with rayon.
///
/// Output is bit-identical to the serial version.
pub fn dequantize_parallel(
    data: &[u8],
    n_blocks: usize,
    shape: &[u64],
) -> Result<Vec<f32>, GgufError> {
    let n = check_blocks(data, n_blocks, shape)?;
    let mut out = vec![0.0f32; n_blocks * QK_K];
    out.par_chunks_exact_mut(QK_K)
        .zip(data.par_chunks_exact(BLOCK_BYTES))
        .for_each(|(dst, raw)| dst.copy_from_slice(&decode_raw(raw)));
    out.truncate(n);
    Ok(out)
}

fn check_blocks(data: &[u8], n_blocks: usize, shape: &[u64]) -> Result<usize, GgufError> {
    let expected_bytes = n_blocks.checked_mul(BLOCK_BYTES).ok_or_else(|| {
        GgufError::Malformed(format!("{} Q4_K blocks overflow usize", n_blocks))
    })?;
    if data.len() != expected_bytes {
        return Err(GgufError::BlockCountMismatch {
            expected: expected_bytes,
            actual: data.len(),
        });
    }
    let n = element_count_usize(shape)?;
    let capacity = n_blocks * QK_K;
    if n > capacity {
        return Err(GgufError::ShapeMismatch {
            expected: n,
            actual: capacity,
        });
    }
    Ok(n)
}

#[inline]
fn decode_raw(raw: &[u8]) -> [f32; QK_K] {
    let mut bytes = [0u8; BLOCK_BYTES];
    bytes.copy_from_slice(raw);
    BlockQ4K::from_bytes(&bytes).decode()
}

// ---------------------------------------------------------------------------
// Error metrics
// ---------------------------------------------------------------------------

/// Reconstruction error between an original tensor and its decoded copy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuantizationError {
    pub mean_squared_error: f64,
    pub max_absolute_error: f64,
    /// `10 * log10(signal_power / mse)`; infinite for a perfect reconstruction.
    pub signal_to_noise_ratio_db: f64,
}

/// Compare `original` against `reconstructed` element by element.
pub fn quantization_error(
    original: &[f32],
    reconstructed: &[f32],
) -> Result<QuantizationError, GgufError> {
    if original.len() != reconstructed.len() {
        return Err(GgufError::ShapeMismatch {
            expected: original.len(),
            actual: reconstructed.len(),
        });
    }
    if original.is_empty() {
        return Ok(QuantizationError {
            mean_squared_error: 0.0,
            max_absolute_error: 0.0,
            signal_to_noise_ratio_db: f64::INFINITY,
        });
    }

    let mut sum_sq_err = 0.0f64;
    let mut sum_sq_signal = 0.0f64;
    let mut max_abs = 0.0f64;
    for (&a, &b) in original.iter().zip(reconstructed) {
        let err = a as f64 - b as f64;
        sum_sq_err += err * err;
        sum_sq_signal += a as f64 * a as f64;
        max_abs = max_abs.max(err.abs());
    }

    let n = original.len() as f64;
    let mse = sum_sq_err / n;
    let snr = if mse == 0.0 {
        f64::INFINITY
    } else {
        10.0 * ((sum_sq_signal / n) / mse).log10()
    };
    Ok(QuantizationError {
        mean_squared_error: mse,
        max_absolute_error: max_abs,
        signal_to_noise_ratio_db: snr,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
