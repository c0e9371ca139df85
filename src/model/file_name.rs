//! GGUF file-name conventions: quantization tags, precision markers and
//! split-file shard suffixes such as `-00001-of-00003`.
//!
//! Naming convention: <https://github.com/ggml-org/ggml/blob/master/docs/gguf.md#gguf-naming-convention>

use std::sync::LazyLock;

use regex::Regex;

const SHARD_SUFFIX: &str = r"(?:-\d{5}-of-\d{5})";

/// `.Q4_K_M`, `-q8_0`, `_IQ3_XS`, optionally followed by a shard suffix.
static QUANT_TAG: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(r"(?i)[._-]I?Q\d(?:_[A-Z0-9]+)*{SHARD_SUFFIX}?(?:[.-]|$)");
    Regex::new(&pattern).expect("quant tag regex compiles")
});

/// A trailing precision marker and/or shard suffix: `-f16`, `.BF16-00001-of-00002`.
static UNQUANTIZED_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(r"(?i)(?:[._-](?:fp16|bf16|f16|fp32|f32))?{SHARD_SUFFIX}?$");
    Regex::new(&pattern).expect("precision suffix regex compiles")
});

/// Whether a file stem names a quantized model, e.g. `mistral-7b.Q4_K_M`.
/// A bare tag without a separator in front (`Q4_K_M`) does not count.
pub(crate) fn has_quant_tag(stem: &str) -> bool {
    QUANT_TAG.is_match(stem)
}

/// The stem with its precision marker and shard suffix removed:
/// `llama-7b-f16-00001-of-00002` → `llama-7b`.
pub(crate) fn base_name(stem: &str) -> String {
    let base = UNQUANTIZED_SUFFIX.replace(stem, "");
    if base.is_empty() {
        stem.to_string()
    } else {
        base.into_owned()
    }
}
