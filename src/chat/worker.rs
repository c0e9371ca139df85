//! Background thread that owns the [`ModelHandle`] and the quantizer.
//!
//! Quantization, model loading and generation all block, so they run here and
//! never on the thread that draws the window. Requests arrive on one
//! unbounded channel and progress goes back on another; the shell polls the
//! event receiver from its own async runtime.

use std::{sync::Arc, thread::JoinHandle};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use super::flow::ChatJob;
use crate::{
    backend::InferenceBackend,
    cancel::CancelToken,
    error::{LauncherError, LauncherResult},
    model::{ModelFormat, ModelHandle, ModelReference},
    quantize::{QuantFormat, Quantize},
};

pub const WORKER_THREAD_NAME: &str = "llama-launcher-worker";

pub type WorkerEvents = UnboundedReceiver<WorkerEvent>;

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerRequest {
    Chat(ChatJob),
    /// Drop the loaded model, if any.
    Release,
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Quantizing {
        source: ModelReference,
        format: QuantFormat,
    },
    Quantized(ModelReference),
    Loading(ModelReference),
    Loaded(ModelReference),
    Replied {
        user_text: String,
        reply: String,
    },
    Released,
    Failed(Arc<LauncherError>),
}

pub(crate) struct Worker<B: InferenceBackend, Q> {
    handle: ModelHandle<B>,
    quantizer: Q,
    events: UnboundedSender<WorkerEvent>,
    cancel: CancelToken,
}

impl<B, Q> Worker<B, Q>
where
    B: InferenceBackend + 'static,
    Q: Quantize + 'static,
{
    pub(crate) fn spawn(
        backend: B,
        quantizer: Q,
        cancel: CancelToken,
    ) -> LauncherResult<(UnboundedSender<WorkerRequest>, WorkerEvents, JoinHandle<()>)> {
        let (request_tx, request_rx) = unbounded_channel();
        let (event_tx, event_rx) = unbounded_channel();
        let worker = Worker {
            handle: ModelHandle::with_cancel(backend, cancel.clone()),
            quantizer,
            events: event_tx,
            cancel,
        };
        let thread = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || worker.run(request_rx))
            .map_err(|e| LauncherError::Internal(format!("failed to start the chat worker: {e}")))?;
        Ok((request_tx, event_rx, thread))
    }

    fn run(mut self, mut requests: UnboundedReceiver<WorkerRequest>) {
        tracing::debug!("chat worker started");
        while let Some(request) = requests.blocking_recv() {
            match request {
                WorkerRequest::Chat(job) => {
                    let user_text = job.user_text.clone();
                    let event = match self.exchange(job) {
                        Ok(reply) => WorkerEvent::Replied { user_text, reply },
                        // a killed server surfaces as a generation error
                        Err(_) if self.cancel.is_cancelled() => {
                            tracing::info!("chat job abandoned on shutdown");
                            WorkerEvent::Failed(Arc::new(LauncherError::Cancelled("chat")))
                        }
                        Err(e) => {
                            tracing::error!("chat job failed: {e}");
                            WorkerEvent::Failed(Arc::new(e))
                        }
                    };
                    self.emit(event);
                }
                WorkerRequest::Release => {
                    if self.handle.release() {
                        self.emit(WorkerEvent::Released);
                    }
                }
                WorkerRequest::Shutdown => break,
            }
        }
        self.handle.release();
        tracing::debug!("chat worker stopped");
    }

    fn exchange(&mut self, job: ChatJob) -> LauncherResult<String> {
        let mut model = job.model;
        if let Some(format) = job.quantize {
            self.emit(WorkerEvent::Quantizing {
                source: model.clone(),
                format,
            });
            let path = self.quantizer.quantize(&model.path, format, &self.cancel)?;
            model = ModelReference::new(path, ModelFormat::Quantized);
            self.emit(WorkerEvent::Quantized(model.clone()));
        }

        let already_loaded = self.handle.loaded_reference() == Some(&model);
        if !already_loaded {
            if self.handle.release() {
                self.emit(WorkerEvent::Released);
            }
            self.emit(WorkerEvent::Loading(model.clone()));
        }
        let Self { handle, events, .. } = self;
        let loaded = handle.ensure_loaded(&model)?;
        if !already_loaded {
            send(events, WorkerEvent::Loaded(model.clone()));
        }

        let completion = loaded.generate(&job.request)?;
        if completion.hit_token_limit {
            tracing::debug!(tokens = completion.tokens_generated, "reply cut at the token limit");
        }
        Ok(completion.text.trim().to_string())
    }

    fn emit(&self, event: WorkerEvent) {
        send(&self.events, event);
    }
}

fn send(events: &UnboundedSender<WorkerEvent>, event: WorkerEvent) {
    if events.send(event).is_err() {
        tracing::debug!("event receiver dropped");
    }
}
