use chrono::{DateTime, Utc};

use super::{container, ModelReference};
use crate::{
    backend::{Completion, GenerationRequest, InferenceBackend, InferenceContext},
    cancel::CancelToken,
    error::{LauncherError, LauncherResult, LoadFailure},
};

/// A live inference context together with the file it was loaded from.
#[derive(Debug)]
pub struct LoadedModel<C> {
    reference: ModelReference,
    context: C,
    loaded_at: DateTime<Utc>,
}

impl<C: InferenceContext> LoadedModel<C> {
    pub fn reference(&self) -> &ModelReference {
        &self.reference
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn generate(&mut self, request: &GenerationRequest) -> LauncherResult<Completion> {
        let completion = self.context.generate(request)?;
        if completion.tokens_generated > request.max_tokens {
            return Err(LauncherError::Generation(format!(
                "backend produced {} tokens, limit is {}",
                completion.tokens_generated, request.max_tokens
            )));
        }
        Ok(completion)
    }
}

/// Owns at most one loaded model.
///
/// Loading a different file always drops the current context before the new
/// one is created, so two models are never resident at once.
#[derive(Debug)]
pub struct ModelHandle<B: InferenceBackend> {
    backend: B,
    loaded: Option<LoadedModel<B::Context>>,
    cancel: CancelToken,
}

impl<B: InferenceBackend> ModelHandle<B> {
    pub fn new(backend: B) -> Self {
        Self::with_cancel(backend, CancelToken::new())
    }

    /// A handle whose loads give up once `cancel` is set.
    pub fn with_cancel(backend: B, cancel: CancelToken) -> Self {
        Self {
            backend,
            loaded: None,
            cancel,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn loaded_reference(&self) -> Option<&ModelReference> {
        self.loaded.as_ref().map(|m| &m.reference)
    }

    /// Returns the loaded model for `reference`, loading it if needed.
    ///
    /// On failure the handle is left empty.
    pub fn ensure_loaded(
        &mut self,
        reference: &ModelReference,
    ) -> LauncherResult<&mut LoadedModel<B::Context>> {
        let is_current = self.loaded_reference() == Some(reference);
        if is_current {
            tracing::debug!(model = %reference, "model already loaded");
            return self
                .loaded
                .as_mut()
                .ok_or_else(|| LauncherError::Internal("loaded model vanished".to_string()));
        }

        self.release();
        if !reference.path.is_file() {
            return Err(LauncherError::load(&reference.path, LoadFailure::NotFound));
        }
        container::inspect(&reference.path)?;

        tracing::info!(model = %reference, "loading model");
        let context = self.backend.load(reference, &self.cancel)?;
        let loaded = self.loaded.insert(LoadedModel {
            reference: reference.clone(),
            context,
            loaded_at: Utc::now(),
        });
        tracing::info!(model = %reference, loaded_at = %loaded.loaded_at, "model loaded");
        Ok(loaded)
    }

    /// Drops the loaded context. Returns `true` if there was one.
    pub fn release(&mut self) -> bool {
        match self.loaded.take() {
            Some(model) => {
                tracing::info!(model = %model.reference, "releasing model");
                true
            }
            None => false,
        }
    }
}
