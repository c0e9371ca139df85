pub mod container;
mod file_name;
pub mod handle;

use std::{
    fmt,
    path::{Path, PathBuf},
};

pub use container::{inspect, ContainerInfo, ContainerKind};
pub(crate) use file_name::{base_name, has_quant_tag};
pub use handle::{LoadedModel, ModelHandle};

use crate::error::{LauncherError, LauncherResult, LoadFailure};

/// File extensions accepted by the file picker.
pub const MODEL_EXTENSIONS: [&str; 2] = ["gguf", "ggml"];

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ModelFormat {
    /// Un-quantized weights (F16, BF16 or F32); a candidate for quantization.
    RawFp16,
    Quantized,
}

/// A model file chosen by the user. Replaced wholesale on a new selection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ModelReference {
    pub path: PathBuf,
    pub format: ModelFormat,
}

impl ModelReference {
    pub fn new(path: impl Into<PathBuf>, format: ModelFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    /// Builds a reference for a file the user picked.
    ///
    /// The extension must be `.gguf` or `.ggml`. The format comes from the
    /// container's `general.file_type` when present and from the file name otherwise.
    /// Relative paths are made absolute against the current directory.
    pub fn select(path: impl Into<PathBuf>) -> LauncherResult<Self> {
        let path = path.into();
        if !has_model_extension(&path) {
            return Err(LauncherError::UnsupportedModelFile { path });
        }
        if !path.is_file() {
            return Err(LauncherError::load(path, LoadFailure::NotFound));
        }
        // the server runs from its own directory; relative paths would resolve there
        let path = std::path::absolute(&path)
            .map_err(|e| LauncherError::load(&path, LoadFailure::Unreadable(e.to_string())))?;
        let info = container::inspect(&path)?;
        let format = info
            .format()
            .unwrap_or_else(|| format_from_file_name(&path));
        tracing::info!(path = %path.display(), ?format, kind = ?info.kind, "model selected");
        Ok(Self { path, format })
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn is_raw_fp16(&self) -> bool {
        self.format == ModelFormat::RawFp16
    }
}

impl fmt::Display for ModelReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let format = match self.format {
            ModelFormat::RawFp16 => "FP16",
            ModelFormat::Quantized => "quantized",
        };
        write!(f, "{} ({format})", self.file_name())
    }
}

pub fn has_model_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            MODEL_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
}

/// Classifies by file name: a stem carrying a quantization tag such as
/// `.Q4_K_M`, `-Q8_0` or `_IQ3_XS` is quantized, anything else is FP16.
pub fn format_from_file_name(path: &Path) -> ModelFormat {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    if has_quant_tag(&stem) {
        ModelFormat::Quantized
    } else {
        ModelFormat::RawFp16
    }
}
