//! The chat state machine.
//!
//! [`ChatFlow`] performs no I/O. User actions return what the worker should
//! do next ([`Submission`], [`WorkerRequest`]); worker results come back in
//! through [`ChatFlow::apply`]. One exchange is in flight at most: a message
//! that arrives while the flow is not [`ChatState::Idle`] is rejected with
//! [`LauncherError::Busy`] and the caller keeps the text.

use std::sync::Arc;

use super::{
    transcript::{ChatMessage, Role, Transcript, STOP_SEQUENCE},
    worker::{WorkerEvent, WorkerRequest},
};
use crate::{
    backend::GenerationRequest,
    config::TOKEN_LIMIT,
    error::{LauncherError, LauncherResult},
    model::ModelReference,
    quantize::QuantFormat,
};

#[derive(Debug, Clone)]
pub enum ChatState {
    Idle,
    AwaitingQuantizeConfirmation,
    Loading,
    Generating,
    Error(Arc<LauncherError>),
}

impl ChatState {
    pub fn name(&self) -> &'static str {
        match self {
            ChatState::Idle => "idle",
            ChatState::AwaitingQuantizeConfirmation => "waiting for a quantization choice",
            ChatState::Loading => "loading the model",
            ChatState::Generating => "generating a reply",
            ChatState::Error(_) => "an error is shown",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, ChatState::Idle)
    }

    /// A job has been handed to the worker and has not finished yet.
    pub fn is_working(&self) -> bool {
        matches!(self, ChatState::Loading | ChatState::Generating)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowSettings {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            max_tokens: TOKEN_LIMIT,
            temperature: 0.7,
        }
    }
}

/// Everything the worker needs for one exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatJob {
    pub model: ModelReference,
    /// Quantize `model` first and load the result instead.
    pub quantize: Option<QuantFormat>,
    pub user_text: String,
    pub request: GenerationRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Blank input; nothing happened.
    Ignored,
    Dispatch(ChatJob),
    /// The selected model is FP16: ask the user, then call
    /// [`ChatFlow::confirm_quantize`], [`ChatFlow::decline_quantize`] or
    /// [`ChatFlow::cancel_quantize`].
    ConfirmQuantize(ModelReference),
}

#[derive(Debug)]
pub struct ChatFlow {
    state: ChatState,
    selected: Option<ModelReference>,
    loaded: Option<ModelReference>,
    pending: Option<String>,
    transcript: Transcript,
    settings: FlowSettings,
}

impl Default for ChatFlow {
    fn default() -> Self {
        Self::new(FlowSettings::default())
    }
}

impl ChatFlow {
    pub fn new(settings: FlowSettings) -> Self {
        Self {
            state: ChatState::Idle,
            selected: None,
            loaded: None,
            pending: None,
            transcript: Transcript::new(),
            settings: FlowSettings {
                max_tokens: settings.max_tokens.min(TOKEN_LIMIT),
                ..settings
            },
        }
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn selected(&self) -> Option<&ModelReference> {
        self.selected.as_ref()
    }

    pub fn loaded(&self) -> Option<&ModelReference> {
        self.loaded.as_ref()
    }

    /// Text of the exchange in progress, if any.
    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn settings(&self) -> FlowSettings {
        self.settings
    }

    /// Replaces the selected model. Returns a release request when a
    /// different model is still loaded.
    pub fn select_model(
        &mut self,
        reference: ModelReference,
    ) -> LauncherResult<Option<WorkerRequest>> {
        self.require_idle("select a model")?;
        tracing::debug!(model = %reference, "selected model changed");
        let release = self
            .loaded
            .as_ref()
            .is_some_and(|loaded| *loaded != reference);
        self.selected = Some(reference);
        Ok(release.then_some(WorkerRequest::Release))
    }

    pub fn submit(&mut self, text: &str) -> LauncherResult<Submission> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Submission::Ignored);
        }
        self.require_idle("send a message")?;
        let Some(model) = self.selected.clone() else {
            return Err(LauncherError::NoModelSelected);
        };

        self.pending = Some(text.to_string());
        if model.is_raw_fp16() && self.loaded.as_ref() != Some(&model) {
            tracing::debug!(model = %model, "FP16 model selected; asking about quantization");
            self.state = ChatState::AwaitingQuantizeConfirmation;
            return Ok(Submission::ConfirmQuantize(model));
        }
        Ok(Submission::Dispatch(self.dispatch(model, None)))
    }

    pub fn confirm_quantize(&mut self, format: QuantFormat) -> LauncherResult<ChatJob> {
        let model = self.awaiting("confirm quantization")?;
        Ok(self.dispatch(model, Some(format)))
    }

    /// Loads the FP16 file as it is.
    pub fn decline_quantize(&mut self) -> LauncherResult<ChatJob> {
        let model = self.awaiting("decline quantization")?;
        Ok(self.dispatch(model, None))
    }

    /// Abandons the exchange and hands the message back.
    pub fn cancel_quantize(&mut self) -> LauncherResult<String> {
        self.awaiting("cancel quantization")?;
        self.state = ChatState::Idle;
        Ok(self.pending.take().unwrap_or_default())
    }

    pub fn apply(&mut self, event: &WorkerEvent) {
        match event {
            WorkerEvent::Quantizing { .. } | WorkerEvent::Loading(_) => {}
            WorkerEvent::Quantized(reference) => {
                self.selected = Some(reference.clone());
            }
            WorkerEvent::Loaded(reference) => {
                self.loaded = Some(reference.clone());
                if matches!(self.state, ChatState::Loading) {
                    self.state = ChatState::Generating;
                }
            }
            WorkerEvent::Released => {
                self.loaded = None;
            }
            WorkerEvent::Replied { user_text, reply } => {
                self.transcript.push(ChatMessage::new(Role::User, user_text.clone()));
                self.transcript.push(ChatMessage::new(Role::Assistant, reply.clone()));
                self.pending = None;
                self.state = ChatState::Idle;
            }
            WorkerEvent::Failed(error) => {
                tracing::debug!(state = self.state.name(), "exchange failed: {error}");
                self.pending = None;
                self.state = ChatState::Error(Arc::clone(error));
            }
        }
    }

    pub fn dismiss_error(&mut self) {
        if matches!(self.state, ChatState::Error(_)) {
            self.state = ChatState::Idle;
        }
    }

    fn dispatch(&mut self, model: ModelReference, quantize: Option<QuantFormat>) -> ChatJob {
        let user_text = self.pending.clone().unwrap_or_default();
        let request = GenerationRequest::new(self.transcript.render_prompt(&user_text))
            .max_tokens(self.settings.max_tokens)
            .temperature(self.settings.temperature)
            .stop(STOP_SEQUENCE);
        self.state = if quantize.is_none() && self.loaded.as_ref() == Some(&model) {
            ChatState::Generating
        } else {
            ChatState::Loading
        };
        ChatJob {
            model,
            quantize,
            user_text,
            request,
        }
    }

    fn require_idle(&self, operation: &'static str) -> LauncherResult<()> {
        if self.state.is_idle() {
            Ok(())
        } else {
            Err(LauncherError::Busy {
                operation,
                state: self.state.name(),
            })
        }
    }

    fn awaiting(&self, operation: &'static str) -> LauncherResult<ModelReference> {
        match (&self.state, &self.selected) {
            (ChatState::AwaitingQuantizeConfirmation, Some(model)) => Ok(model.clone()),
            _ => Err(LauncherError::Busy {
                operation,
                state: self.state.name(),
            }),
        }
    }
}
