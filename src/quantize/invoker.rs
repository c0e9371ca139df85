use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::{Duration, Instant},
};

use wait_timeout::ChildExt;

use super::QuantFormat;
use crate::{
    cancel::CancelToken,
    config::LauncherConfig,
    error::{LauncherError, LauncherResult, LoadFailure},
    model::{base_name, has_quant_tag},
    process::{kill_and_reap, OutputTail},
};

const STDERR_TAIL_LINES: usize = 20;

/// How often a running quantization checks for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Turns an FP16 model file into a quantized one.
pub trait Quantize: Send {
    /// Returns the path of the quantized file. Gives up with
    /// [`LauncherError::Cancelled`] once `cancel` is set.
    fn quantize(
        &self,
        source: &Path,
        format: QuantFormat,
        cancel: &CancelToken,
    ) -> LauncherResult<PathBuf>;
}

/// Runs the external `llama-quantize` executable as a blocking subprocess.
#[derive(Debug, Clone)]
pub struct QuantizeInvoker {
    executable: PathBuf,
    timeout: Duration,
}

impl QuantizeInvoker {
    pub fn new(executable: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            timeout,
        }
    }

    pub fn from_config(config: &LauncherConfig) -> LauncherResult<Self> {
        Ok(Self::new(
            config.quantize_executable_path()?,
            config.quantize_timeout(),
        ))
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn run(
        &self,
        source: &Path,
        output: &Path,
        format: QuantFormat,
        cancel: &CancelToken,
    ) -> LauncherResult<()> {
        let mut cmd = Command::new(&self.executable);
        cmd.arg(source)
            .arg(output)
            .arg(format.code())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        tracing::info!("Starting quantization with command: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LauncherError::QuantizeExecutableMissing {
                path: self.executable.clone(),
            },
            _ => LauncherError::QuantizeFailed {
                model: source.to_path_buf(),
                reason: format!("failed to start '{}': {e}", self.executable.display()),
            },
        })?;
        let stderr = child
            .stderr
            .take()
            .map(|pipe| OutputTail::capture(pipe, STDERR_TAIL_LINES))
            .unwrap_or_else(OutputTail::empty);

        let started = Instant::now();
        let status = loop {
            let remaining = self.timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break None;
            }
            let status = child
                .wait_timeout(remaining.min(POLL_INTERVAL))
                .map_err(|e| LauncherError::QuantizeFailed {
                    model: source.to_path_buf(),
                    reason: format!("failed to wait for the quantize process: {e}"),
                })?;
            if status.is_some() {
                break status;
            }
            if cancel.is_cancelled() {
                kill_and_reap(&mut child);
                remove_partial_output(output);
                tracing::info!(model = %source.display(), "quantization cancelled");
                return Err(LauncherError::Cancelled("quantization"));
            }
        };

        let Some(status) = status else {
            kill_and_reap(&mut child);
            remove_partial_output(output);
            tracing::error!(
                model = %source.display(),
                timeout = ?self.timeout,
                "quantization timed out: {}",
                stderr.snapshot()
            );
            return Err(LauncherError::QuantizeTimedOut {
                model: source.to_path_buf(),
                elapsed: started.elapsed(),
            });
        };

        let stderr = stderr.finish();
        if !status.success() {
            remove_partial_output(output);
            let code = status
                .code()
                .map_or_else(|| "terminated by signal".to_string(), |c| format!("exit code {c}"));
            let reason = if stderr.trim().is_empty() {
                code
            } else {
                format!("{code}: {}", stderr.trim())
            };
            return Err(LauncherError::QuantizeFailed {
                model: source.to_path_buf(),
                reason,
            });
        }
        if !output.is_file() {
            return Err(LauncherError::QuantizeFailed {
                model: source.to_path_buf(),
                reason: format!(
                    "quantize exited successfully but produced no '{}'",
                    output.display()
                ),
            });
        }
        tracing::info!(
            output = %output.display(),
            elapsed = ?started.elapsed(),
            "quantization finished"
        );
        Ok(())
    }
}

impl Quantize for QuantizeInvoker {
    fn quantize(
        &self,
        source: &Path,
        format: QuantFormat,
        cancel: &CancelToken,
    ) -> LauncherResult<PathBuf> {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if has_quant_tag(&stem) {
            return Err(LauncherError::AlreadyQuantized {
                path: source.to_path_buf(),
            });
        }
        if !source.is_file() {
            return Err(LauncherError::load(source, LoadFailure::NotFound));
        }

        let output = derive_output_path(source, format);
        if output.is_file() {
            tracing::info!(output = %output.display(), "reusing existing quantized model");
            return Ok(output);
        }
        if !self.executable.is_file() {
            return Err(LauncherError::QuantizeExecutableMissing {
                path: self.executable.clone(),
            });
        }

        self.run(source, &output, format, cancel)?;
        Ok(output)
    }
}

/// `model.fp16.gguf` + `Q4_K_M` → `model.Q4_K_M.gguf`, in the source's directory.
pub fn derive_output_path(source: &Path, format: QuantFormat) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    source.with_file_name(format!("{}.{}.gguf", base_name(&stem), format.code()))
}

fn remove_partial_output(output: &Path) {
    if output.exists() {
        if let Err(e) = std::fs::remove_file(output) {
            tracing::error!(output = %output.display(), error = %e, "failed to remove partial output");
        }
    }
}
