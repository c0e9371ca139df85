//! The inference boundary: everything below these traits belongs to llama.cpp.
//!
//! A backend turns a [`ModelReference`] into a live [`InferenceContext`]; the
//! context answers [`GenerationRequest`]s until it is dropped. Dropping the
//! context must free whatever the backend allocated for it.

pub mod llama_server;

pub use llama_server::{LlamaServerBackend, LlamaServerContext};

use crate::{
    cancel::CancelToken, config::TOKEN_LIMIT, error::LauncherResult, model::ModelReference,
};

pub trait InferenceBackend: Send {
    type Context: InferenceContext;

    /// Loads the model file. Blocks until the context can serve requests or
    /// `cancel` is set. Work started for the context should stop when `cancel` is set.
    fn load(
        &self,
        reference: &ModelReference,
        cancel: &CancelToken,
    ) -> LauncherResult<Self::Context>;
}

pub trait InferenceContext: Send {
    fn generate(&mut self, request: &GenerationRequest) -> LauncherResult<Completion>;
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stop: Vec<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: TOKEN_LIMIT,
            temperature: 0.7,
            stop: Vec::new(),
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn stop<S: Into<String>>(mut self, stop: S) -> Self {
        self.stop.push(stop.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Completion {
    pub text: String,
    pub tokens_generated: u32,
    /// Generation ended because `max_tokens` was reached.
    pub hit_token_limit: bool,
}
