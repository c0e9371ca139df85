// top-level error for the public API

use std::{path::PathBuf, time::Duration};

#[derive(serde::Serialize, Debug, thiserror::Error)]
pub enum LauncherError {
    #[error("failed to load model '{path}': {reason}")]
    Load { path: PathBuf, reason: LoadFailure },

    #[error("quantization executable not found at '{path}'")]
    QuantizeExecutableMissing { path: PathBuf },

    #[error("quantization of '{model}' failed: {reason}")]
    QuantizeFailed { model: PathBuf, reason: String },

    #[error("quantization of '{model}' exceeded {elapsed:?} and was aborted")]
    QuantizeTimedOut { model: PathBuf, elapsed: Duration },

    /// Re-quantizing an already quantized file is not supported by llama-quantize.
    #[error("'{path}' is already quantized; select the FP16 version of the model instead")]
    AlreadyQuantized { path: PathBuf },

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("no model selected; load a .gguf or .ggml file first")]
    NoModelSelected,

    #[error("unsupported model file '{path}': expected a .gguf or .ggml file")]
    UnsupportedModelFile { path: PathBuf },

    /// A second action arrived while another one is still in flight.
    #[error("cannot {operation} while {state}")]
    Busy {
        operation: &'static str,
        state: &'static str,
    },

    /// The application is shutting down; the step was abandoned.
    #[error("{0} was cancelled")]
    Cancelled(&'static str),

    #[error("invalid {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("{operation} failed for '{path}'")]
    FileSystem {
        operation: &'static str,
        path: PathBuf,
        #[source]
        #[serde(serialize_with = "std_io_error_to_string")]
        source: std::io::Error,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

/// Why a model file could not be turned into a running inference context.
#[derive(serde::Serialize, Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadFailure {
    #[error("file does not exist")]
    NotFound,

    #[error("file is unreadable: {0}")]
    Unreadable(String),

    #[error("not a valid GGUF/GGML container: {0}")]
    InvalidContainer(String),

    #[error("inference server executable not found at '{0}'")]
    ServerExecutableMissing(PathBuf),

    #[error("inference server exited during start-up: {0}")]
    ServerExited(String),

    #[error("model did not become ready within {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Backend(String),
}

pub type LauncherResult<T> = std::result::Result<T, LauncherError>;

impl LauncherError {
    pub fn load(path: impl Into<PathBuf>, reason: LoadFailure) -> Self {
        Self::Load {
            path: path.into(),
            reason,
        }
    }

    pub fn file_system(
        operation: &'static str,
        path: impl Into<PathBuf>,
        err: impl Into<std::io::Error>,
    ) -> Self {
        Self::FileSystem {
            operation,
            path: path.into(),
            source: err.into(),
        }
    }

    /// Short title used by the shells for the error dialog.
    pub fn dialog_title(&self) -> &'static str {
        match self {
            Self::Load { .. } | Self::UnsupportedModelFile { .. } => "Model load error",
            Self::QuantizeExecutableMissing { .. }
            | Self::QuantizeFailed { .. }
            | Self::QuantizeTimedOut { .. }
            | Self::AlreadyQuantized { .. } => "Quantization error",
            Self::Generation(_) => "Generation error",
            Self::NoModelSelected => "No model selected",
            Self::Busy { .. } => "Please wait",
            Self::Cancelled(_) => "Cancelled",
            Self::InvalidConfig { .. } => "Configuration error",
            Self::FileSystem { .. } | Self::Internal(_) => "Error",
        }
    }
}

pub(crate) fn std_io_error_to_string<S>(e: &impl std::fmt::Display, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_str(&e.to_string())
}
