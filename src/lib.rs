pub mod error;
pub mod gguf;

#[cfg(feature = "cli")]
pub mod cli;

pub use error::GgufError;
pub use gguf::metadata::{GgufValue, Metadata};
pub use gguf::q4k::{dequantize, quantization_error, quantize, BlockQ4K, QuantizationError};
pub use gguf::quant::{f16_to_f32, f32_to_f16, tensor_byte_size, GgufTensorType};
pub use gguf::{GgufDocument, MappedGguf, ParseOptions, TensorInfo};
