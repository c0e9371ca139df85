//! Converting FP16 model files into quantized GGUF files with `llama-quantize`.

mod format;
mod invoker;

pub use format::QuantFormat;
pub use invoker::{derive_output_path, Quantize, QuantizeInvoker};
