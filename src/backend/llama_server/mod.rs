//! Inference through llama.cpp's `llama-server`.
//!
//! Each loaded model gets its own server process bound to a free loopback
//! port. Loading blocks until `/health` reports ready, the process exits, or
//! the load budget runs out. The context owns the process, so releasing the
//! model stops the server.

mod client;
mod process;

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    thread::sleep,
    time::{Duration, Instant},
};

use bon::Builder;

pub use client::{ClientError, CompletionRequest, CompletionResponse, HealthStatus, ServerClient};
use client::{free_port, HOST};
use process::ServerProcess;

use super::{Completion, GenerationRequest, InferenceBackend, InferenceContext};
use crate::{
    cancel::CancelToken,
    config::LauncherConfig,
    error::{LauncherError, LauncherResult, LoadFailure},
    model::ModelReference,
};

#[derive(Builder, Debug, Clone)]
pub struct LlamaServerBackend {
    #[builder(into)]
    executable: PathBuf,

    /// Prompt plus reply must fit; the transcript grows with every turn.
    #[builder(default = 4096)]
    ctx_size: u32,

    /// Upper bound on the time from spawn to a healthy `/health`.
    #[builder(default = Duration::from_secs(120))]
    load_budget: Duration,

    #[builder(default = Duration::from_secs(300))]
    request_timeout: Duration,

    /// Pause between `/health` probes.
    #[builder(default = Duration::from_millis(250))]
    retry_delay: Duration,

    /// Passed through verbatim, e.g. `["--n-gpu-layers", "99"]`.
    #[builder(default)]
    extra_args: Vec<String>,
}

impl LlamaServerBackend {
    pub fn from_config(config: &LauncherConfig) -> LauncherResult<Self> {
        Ok(Self::builder()
            .executable(config.server_executable_path()?)
            .ctx_size(config.ctx_size)
            .load_budget(config.load_budget())
            .request_timeout(config.request_timeout())
            .build())
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn args(&self, model: &Path, port: u16) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--model".into(),
            model.as_os_str().to_owned(),
            "--host".into(),
            HOST.into(),
            "--port".into(),
            port.to_string().into(),
            "--ctx-size".into(),
            self.ctx_size.to_string().into(),
        ];
        args.extend(self.extra_args.iter().map(OsString::from));
        args
    }

    fn wait_until_ready(
        &self,
        model: &Path,
        client: &ServerClient,
        process: &mut ServerProcess,
        cancel: &CancelToken,
    ) -> LauncherResult<()> {
        let started = Instant::now();
        loop {
            let exited = process.exit_report();
            // cancelling kills the server; read the flag after polling the exit
            if cancel.is_cancelled() {
                tracing::info!(pid = process.pid(), "model load cancelled");
                return Err(LauncherError::Cancelled("model loading"));
            }
            if let Some(report) = exited {
                tracing::error!(pid = process.pid(), "llama-server exited during start-up: {report}");
                return Err(LauncherError::load(model, LoadFailure::ServerExited(report)));
            }
            match client.health() {
                HealthStatus::Ready => {
                    tracing::info!(
                        url = client.base_url(),
                        elapsed = ?started.elapsed(),
                        "llama-server ready"
                    );
                    return Ok(());
                }
                HealthStatus::Loading => tracing::trace!("model still loading"),
                HealthStatus::Unavailable(reason) => {
                    tracing::trace!("health check not ready ({reason}); retrying in {:?}", self.retry_delay)
                }
            }
            if started.elapsed() >= self.load_budget {
                tracing::error!(
                    budget = ?self.load_budget,
                    "llama-server did not become ready: {}",
                    process.stderr_tail()
                );
                return Err(LauncherError::load(
                    model,
                    LoadFailure::Timeout(self.load_budget),
                ));
            }
            sleep(self.retry_delay);
        }
    }
}

impl InferenceBackend for LlamaServerBackend {
    type Context = LlamaServerContext;

    fn load(
        &self,
        reference: &ModelReference,
        cancel: &CancelToken,
    ) -> LauncherResult<LlamaServerContext> {
        let fail = |reason| LauncherError::load(&reference.path, reason);
        if !self.executable.is_file() {
            return Err(fail(LoadFailure::ServerExecutableMissing(
                self.executable.clone(),
            )));
        }
        // the server's working directory is its own; hand it an absolute path
        let model = std::path::absolute(&reference.path)
            .map_err(|e| fail(LoadFailure::Unreadable(e.to_string())))?;
        let port = free_port()
            .map_err(|e| fail(LoadFailure::Backend(format!("no free port available: {e}"))))?;

        let mut process = ServerProcess::spawn(&self.executable, &self.args(&model, port), cancel)
            .map_err(fail)?;
        let client = ServerClient::new(format!("http://{HOST}:{port}"), self.request_timeout);
        self.wait_until_ready(&reference.path, &client, &mut process, cancel)?;

        Ok(LlamaServerContext {
            client,
            process,
            model: reference.clone(),
        })
    }
}

/// A model served by a live `llama-server`.
#[derive(Debug)]
pub struct LlamaServerContext {
    client: ServerClient,
    process: ServerProcess,
    model: ModelReference,
}

impl LlamaServerContext {
    pub fn model(&self) -> &ModelReference {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }
}

impl InferenceContext for LlamaServerContext {
    fn generate(&mut self, request: &GenerationRequest) -> LauncherResult<Completion> {
        if let Some(report) = self.process.exit_report() {
            return Err(LauncherError::Generation(format!("llama-server exited: {report}")));
        }
        let response = self
            .client
            .completion(&CompletionRequest {
                prompt: &request.prompt,
                n_predict: request.max_tokens,
                temperature: request.temperature,
                stop: &request.stop,
                cache_prompt: true,
            })
            .map_err(|e| LauncherError::Generation(e.to_string()))?;
        tracing::debug!(
            model = %self.model,
            tokens = response.tokens_predicted,
            "completion received"
        );
        let hit_token_limit = response.hit_token_limit();
        Ok(Completion {
            text: response.content,
            tokens_generated: response.tokens_predicted,
            hit_token_limit,
        })
    }
}
