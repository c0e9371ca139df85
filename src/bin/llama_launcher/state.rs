use dioxus::prelude::*;
use llama_launcher::{ChatSession, LauncherError, QuantFormat, Submission, WorkerEvent};

use crate::dialogs::{self, QuantizeAnswer};

const READY_HINT: &str = "Load a .gguf or .ggml model to start.";

/// Window-wide state, shared through the context API.
#[derive(Clone, Copy)]
pub struct LauncherState {
    pub session: Signal<ChatSession>,
    pub draft: Signal<String>,
    pub format: Signal<QuantFormat>,
    pub status: Signal<String>,
}

impl LauncherState {
    pub fn new(session: ChatSession, format: QuantFormat) -> Self {
        Self {
            session: Signal::new(session),
            draft: Signal::new(String::new()),
            format: Signal::new(format),
            status: Signal::new(READY_HINT.to_string()),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.session.read().state().is_idle()
    }

    pub async fn pick_model(&mut self) {
        let Some(path) = dialogs::pick_model().await else {
            return;
        };
        let result = self.session.write().select_path(path);
        match result {
            Ok(model) => self.status.set(format!("Selected {model}. Send a message to load it.")),
            Err(e) => dialogs::show_error(&e).await,
        }
    }

    pub async fn submit(&mut self) {
        let text = (self.draft)();
        let result = self.session.write().submit(&text);
        let model = match result {
            Ok(Submission::Ignored) => return,
            Ok(Submission::Dispatch(_)) => {
                self.draft.set(String::new());
                return;
            }
            Ok(Submission::ConfirmQuantize(model)) => model,
            Err(e) => {
                dialogs::show_error(&e).await;
                return;
            }
        };

        self.draft.set(String::new());
        let format = (self.format)();
        let result = match dialogs::ask_quantize(&model, format).await {
            QuantizeAnswer::Quantize => self.session.write().confirm_quantize(format),
            QuantizeAnswer::AsIs => self.session.write().decline_quantize(),
            QuantizeAnswer::Cancel => {
                let text = self.session.write().cancel_quantize();
                text.map(|text| self.draft.set(text))
            }
        };
        if let Err(e) = result {
            dialogs::show_error(&e).await;
        }
    }

    pub fn on_event(&mut self, event: WorkerEvent) {
        let status = match &event {
            WorkerEvent::Quantizing { source, format } => Some(format!(
                "Quantizing {} to {format}. This can take several minutes…",
                source.file_name()
            )),
            WorkerEvent::Quantized(model) => Some(format!("Quantized model saved as {model}.")),
            WorkerEvent::Loading(model) => Some(format!("Loading {model}…")),
            WorkerEvent::Loaded(model) => Some(format!("{model} loaded. Thinking…")),
            WorkerEvent::Replied { .. } | WorkerEvent::Released => None,
            WorkerEvent::Failed(error) => Some(error.dialog_title().to_string()),
        };
        self.session.write().apply(&event);
        if let Some(status) = status {
            self.status.set(status);
        }

        match event {
            WorkerEvent::Replied { .. } => {
                let status = match self.session.read().flow().loaded() {
                    Some(model) => format!("{model} ready."),
                    None => READY_HINT.to_string(),
                };
                self.status.set(status);
            }
            // only raised while the window is closing
            WorkerEvent::Failed(error) if matches!(*error, LauncherError::Cancelled(_)) => {}
            WorkerEvent::Failed(error) => {
                let mut state = *self;
                spawn(async move {
                    dialogs::show_error(&error).await;
                    state.session.write().dismiss_error();
                    state.status.set(READY_HINT.to_string());
                });
            }
            _ => {}
        }
    }
}
