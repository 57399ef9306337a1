// Typed views over tensor data.

use crate::error::GgufError;
use super::quant::{self, GgufTensorType};
use super::{q4k, TensorInfo};

// ---------------------------------------------------------------------------
// GgufTensor: a named, typed view into tensor data
// ---------------------------------------------------------------------------

/// A tensor from a GGUF buffer.
///
/// The raw data is a zero-copy slice of the source buffer. Use the
/// `to_f32()` method to dequantize into a `Vec<f32>`.
#[derive(Debug, Clone)]
pub struct GgufTensor<'a> {
    /// Tensor name (e.g. "blk.0.attn_q.weight").
    pub name: String,
    /// Shape as stored in the GGUF file (dims[0] is the fastest-varying
    /// dimension).
    pub shape: Vec<u64>,
    /// Data type / quantization format.
    pub dtype: GgufTensorType,
    /// Raw bytes of the tensor data.
    pub data: &'a [u8],
}

impl<'a> GgufTensor<'a> {
    pub fn new(info: &TensorInfo, data: &'a [u8]) -> Self {
        Self {
            name: info.name.clone(),
            shape: info.dims.clone(),
            dtype: info.dtype,
            data,
        }
    }

    /// Total number of logical elements in the tensor, saturating at
    /// `u64::MAX` for shapes whose product overflows.
    pub fn n_elements(&self) -> u64 {
        quant::element_count(&self.shape).unwrap_or(u64::MAX)
    }

    /// Size in bytes of the raw data slice.
    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    /// Expected byte size computed from shape and dtype.
    pub fn expected_byte_size(&self) -> Result<u64, GgufError> {
        quant::tensor_byte_size(&self.shape, self.dtype)
    }

    /// Dequantize the tensor data to f32.
    ///
    /// Supported types: F32, F16, BF16, Q4_K. Other types return
    /// [`GgufError::UnsupportedCodec`].
    pub fn to_f32(&self) -> Result<Vec<f32>, GgufError> {
        let n = quant::element_count_usize(&self.shape)?;
        quant::decode(self.dtype, self.data, n)
    }

    /// Like [`to_f32`](Self::to_f32), decoding Q4_K blocks on the rayon
    /// thread pool.
    pub fn to_f32_parallel(&self) -> Result<Vec<f32>, GgufError> {
        match self.dtype {
            GgufTensorType::Q4K => {
                let n_blocks = self.data.len() / q4k::BLOCK_BYTES;
                q4k::dequantize_parallel(self.data, n_blocks, &self.shape)
            }
            _ => self.to_f32(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gguf::quant::{f32_to_bf16, f32_to_f16};
    use crate::gguf::testing::GgufBuilder;
    use crate::gguf::GgufDocument;

    fn single_tensor_file(name: &str, dims: &[u64], dtype: GgufTensorType, data: &[u8]) -> Vec<u8> {
        GgufBuilder::new()
            .kv_string("general.architecture", "test")
            .tensor(name, dims, dtype.id(), data)
            .build()
    }

    fn view<'a>(doc: &GgufDocument, bytes: &'a [u8], name: &str) -> GgufTensor<'a> {
        doc.tensor_view(bytes, name).unwrap()
    }

    #[test]
    fn test_load_f32_tensor() {
        let values = [1.0f32, 2.0, 3.0, 4.0];
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let bytes = single_tensor_file("f32_tensor", &[4], GgufTensorType::F32, &data);
        let doc = GgufDocument::parse(&bytes).unwrap();

        let tensor = view(&doc, &bytes, "f32_tensor");
        assert_eq!(tensor.name, "f32_tensor");
        assert_eq!(tensor.shape, vec![4]);
        assert_eq!(tensor.dtype, GgufTensorType::F32);
        assert_eq!(tensor.n_elements(), 4);
        assert_eq!(tensor.byte_size(), 16);
        assert_eq!(tensor.expected_byte_size().unwrap(), 16);
        assert_eq!(tensor.to_f32().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_load_f16_tensor_all_special_values() {
        let values = [1.0f32, -0.5, 0.0, -0.0, 65504.0, f32::INFINITY, f32::NEG_INFINITY];
        let data: Vec<u8> = values
            .iter()
            .flat_map(|&v| f32_to_f16(v).to_le_bytes())
            .collect();
        let bytes = single_tensor_file("f16", &[7], GgufTensorType::F16, &data);
        let doc = GgufDocument::parse(&bytes).unwrap();

        let out = view(&doc, &bytes, "f16").to_f32().unwrap();
        assert_eq!(out.len(), 7);
        for (a, b) in values.iter().zip(&out) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_load_bf16_tensor() {
        let values = [1.0f32, -2.0, 0.15625, 3.0e38];
        let data: Vec<u8> = values
            .iter()
            .flat_map(|&v| f32_to_bf16(v).to_le_bytes())
            .collect();
        let bytes = single_tensor_file("bf16", &[2, 2], GgufTensorType::BF16, &data);
        let doc = GgufDocument::parse(&bytes).unwrap();

        let out = view(&doc, &bytes, "bf16").to_f32().unwrap();
        assert_eq!(out[0], 1.0);
        assert_eq!(out[1], -2.0);
        assert_eq!(out[2], 0.15625);
        assert!((out[3] - 3.0e38).abs() / 3.0e38 < 1e-2);
    }

    #[test]
    fn test_load_q4k_tensor() {
        let values: Vec<f32> = (0..512).map(|i| ((i % 32) as f32 - 16.0) / 8.0).collect();
        let (data, n_blocks) = q4k::quantize(&values, &[256, 2]).unwrap();
        assert_eq!(n_blocks, 2);
        let bytes = single_tensor_file("q4k", &[256, 2], GgufTensorType::Q4K, &data);
        let doc = GgufDocument::parse(&bytes).unwrap();

        let tensor = view(&doc, &bytes, "q4k");
        assert_eq!(tensor.byte_size(), 288);
        let out = tensor.to_f32().unwrap();
        assert_eq!(out.len(), 512);
        let step = (31.0 / 8.0) / 15.0;
        for (a, b) in values.iter().zip(&out) {
            assert!((a - b).abs() <= step, "{} vs {}", a, b);
        }
        assert_eq!(tensor.to_f32_parallel().unwrap(), out);
    }

    #[test]
    fn test_load_q4k_tensor_partial_block() {
        // 300 elements occupy two blocks; decode truncates to 300.
        let values: Vec<f32> = (0..300).map(|i| -(i as f32) / 300.0).collect();
        let (data, _) = q4k::quantize(&values, &[300]).unwrap();
        let bytes = single_tensor_file("q4k", &[300], GgufTensorType::Q4K, &data);
        let doc = GgufDocument::parse(&bytes).unwrap();
        assert_eq!(doc.tensor("q4k").unwrap().byte_size, 288);

        let tensor = view(&doc, &bytes, "q4k");
        assert_eq!(tensor.to_f32().unwrap().len(), 300);
        assert_eq!(tensor.to_f32_parallel().unwrap().len(), 300);
    }

    #[test]
    fn test_unsupported_dequant_type() {
        // One Q8_0 block: can be sized, not decoded.
        let bytes = single_tensor_file("q8", &[32], GgufTensorType::Q8_0, &[0u8; 34]);
        let doc = GgufDocument::parse(&bytes).unwrap();
        let tensor = view(&doc, &bytes, "q8");
        assert_eq!(tensor.expected_byte_size().unwrap(), 34);
        assert!(matches!(
            tensor.to_f32(),
            Err(GgufError::UnsupportedCodec(GgufTensorType::Q8_0))
        ));
        assert!(matches!(
            tensor.to_f32_parallel(),
            Err(GgufError::UnsupportedCodec(GgufTensorType::Q8_0))
        ));
    }

    #[test]
    fn test_load_tensor_3d_shape() {
        let values: Vec<f32> = (0..24).map(|i| i as f32).collect();
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let bytes = single_tensor_file("t3", &[4, 3, 2], GgufTensorType::F32, &data);
        let doc = GgufDocument::parse(&bytes).unwrap();

        let tensor = view(&doc, &bytes, "t3");
        assert_eq!(tensor.shape, vec![4, 3, 2]);
        assert_eq!(tensor.n_elements(), 24);
        assert_eq!(tensor.to_f32().unwrap(), values);
    }

    #[test]
    fn test_oversized_shape_is_malformed() {
        let info = TensorInfo {
            name: "huge".into(),
            n_dims: 2,
            dims: vec![1 << 40, 1 << 40],
            dtype: GgufTensorType::F32,
            offset: 0,
            absolute_offset: 0,
            byte_size: 0,
        };
        let tensor = GgufTensor::new(&info, &[]);
        assert_eq!(tensor.n_elements(), u64::MAX);
        assert!(matches!(tensor.to_f32(), Err(GgufError::Malformed(_))));
        assert!(matches!(tensor.to_f32_parallel(), Err(GgufError::Malformed(_))));
    }

    #[test]
    fn test_view_with_mismatched_slice() {
        let info = TensorInfo {
            name: "t".into(),
            n_dims: 1,
            dims: vec![4],
            dtype: GgufTensorType::F32,
            offset: 0,
            absolute_offset: 0,
            byte_size: 16,
        };
        let data = [0u8; 12];
        let tensor = GgufTensor::new(&info, &data);
        assert!(matches!(
            tensor.to_f32(),
            Err(GgufError::BlockCountMismatch { expected: 16, actual: 12 })
        ));
    }
}
