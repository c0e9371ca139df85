use std::{path::PathBuf, thread::JoinHandle};

use tokio::sync::mpsc::UnboundedSender;

use super::{
    flow::{ChatFlow, ChatJob, ChatState, FlowSettings, Submission},
    transcript::Transcript,
    worker::{Worker, WorkerEvent, WorkerEvents, WorkerRequest},
};
use crate::{
    backend::{InferenceBackend, LlamaServerBackend},
    cancel::CancelToken,
    config::LauncherConfig,
    error::{LauncherError, LauncherResult},
    model::ModelReference,
    quantize::{QuantFormat, Quantize, QuantizeInvoker},
};

/// The chat flow wired to its worker thread.
///
/// Lives on the presentation thread. Every action updates the flow and
/// forwards the resulting request to the worker. Events from
/// [`ChatSession::take_events`] must be fed back through
/// [`ChatSession::apply`].
#[derive(Debug)]
pub struct ChatSession {
    flow: ChatFlow,
    requests: UnboundedSender<WorkerRequest>,
    events: Option<WorkerEvents>,
    worker: Option<JoinHandle<()>>,
    cancel: CancelToken,
}

impl ChatSession {
    /// Session backed by `llama-server` and `llama-quantize`.
    pub fn spawn(config: &LauncherConfig) -> LauncherResult<Self> {
        let backend = LlamaServerBackend::from_config(config)?;
        let quantizer = QuantizeInvoker::from_config(config)?;
        tracing::info!(
            server = %backend.executable().display(),
            quantize = %quantizer.executable().display(),
            "starting chat session"
        );
        Self::with_worker(backend, quantizer, config.flow_settings())
    }

    pub fn with_worker<B, Q>(backend: B, quantizer: Q, settings: FlowSettings) -> LauncherResult<Self>
    where
        B: InferenceBackend + 'static,
        Q: Quantize + 'static,
    {
        let cancel = CancelToken::new();
        let (requests, events, worker) = Worker::spawn(backend, quantizer, cancel.clone())?;
        Ok(Self {
            flow: ChatFlow::new(settings),
            requests,
            events: Some(events),
            worker: Some(worker),
            cancel,
        })
    }

    /// The worker's event stream. Can be taken once.
    pub fn take_events(&mut self) -> Option<WorkerEvents> {
        self.events.take()
    }

    pub fn flow(&self) -> &ChatFlow {
        &self.flow
    }

    pub fn state(&self) -> &ChatState {
        self.flow.state()
    }

    pub fn transcript(&self) -> &Transcript {
        self.flow.transcript()
    }

    /// Validates and selects a file picked by the user.
    pub fn select_path(&mut self, path: impl Into<PathBuf>) -> LauncherResult<ModelReference> {
        let reference = ModelReference::select(path)?;
        self.select_model(reference.clone())?;
        Ok(reference)
    }

    pub fn select_model(&mut self, reference: ModelReference) -> LauncherResult<()> {
        if let Some(request) = self.flow.select_model(reference)? {
            self.send(request)?;
        }
        Ok(())
    }

    pub fn submit(&mut self, text: &str) -> LauncherResult<Submission> {
        let submission = self.flow.submit(text)?;
        if let Submission::Dispatch(job) = &submission {
            self.dispatch(job.clone())?;
        }
        Ok(submission)
    }

    pub fn confirm_quantize(&mut self, format: QuantFormat) -> LauncherResult<()> {
        let job = self.flow.confirm_quantize(format)?;
        self.dispatch(job)
    }

    pub fn decline_quantize(&mut self) -> LauncherResult<()> {
        let job = self.flow.decline_quantize()?;
        self.dispatch(job)
    }

    pub fn cancel_quantize(&mut self) -> LauncherResult<String> {
        self.flow.cancel_quantize()
    }

    pub fn apply(&mut self, event: &WorkerEvent) {
        self.flow.apply(event);
    }

    pub fn dismiss_error(&mut self) {
        self.flow.dismiss_error();
    }

    /// Stops the worker and releases the loaded model.
    ///
    /// A job in progress is abandoned: a running quantization is killed and its
    /// partial output removed, a load stops waiting, and the server is killed
    /// under a pending reply. Returns once the worker thread has exited.
    /// Later calls do nothing.
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.cancel.cancel();
        let _ = self.requests.send(WorkerRequest::Shutdown);
        if worker.join().is_err() {
            tracing::error!("chat worker panicked");
        }
    }

    fn dispatch(&mut self, job: ChatJob) -> LauncherResult<()> {
        if let Err(e) = self.send(WorkerRequest::Chat(job)) {
            // the flow already moved to Loading/Generating
            let error = std::sync::Arc::new(LauncherError::Internal(e.to_string()));
            self.flow.apply(&WorkerEvent::Failed(error));
            return Err(e);
        }
        Ok(())
    }

    fn send(&self, request: WorkerRequest) -> LauncherResult<()> {
        self.requests
            .send(request)
            .map_err(|_| LauncherError::Internal("the chat worker has stopped".to_string()))
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
