//! llama_launcher – a desktop chat window for local GGUF models
//! ============================================================
//!
//! ## What it does
//! - **Pick a model** – any `.gguf` / `.ggml` file. The header is read to tell FP16 weights from quantized ones.
//! - **Quantize on demand** – FP16 models can be shrunk with `llama-quantize` (`Q4_K_M`, `Q3_K_S`, `Q2_K`, …) before the first load.
//! - **Lazy loading** – the model is loaded on the first message, by a `llama-server` child bound to a loopback port.
//! - **One model at a time** – selecting another file stops the previous server first.
//! - **Never blocks the window** – quantization, loading and generation run on a worker thread.
//!
//! ---
//!
//! ```rust,no_run
//! use llama_launcher::*;
//!
//! fn main() -> LauncherResult<()> {
//!     let config = LauncherConfig::load()?;
//!     let mut session = ChatSession::spawn(&config)?;
//!     let mut events = session.take_events().expect("fresh session");
//!
//!     session.select_path("/models/mistral-7b-instruct.Q4_K_M.gguf")?;
//!     session.submit("Tell me a joke about Rust.")?;
//!     while let Some(event) = events.blocking_recv() {
//!         session.apply(&event);
//!         if session.state().is_idle() {
//!             break;
//!         }
//!     }
//!     println!("{}", session.transcript().messages()[1].text);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cancel;
pub mod chat;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub(crate) mod process;
pub mod quantize;

pub use backend::{
    Completion, GenerationRequest, InferenceBackend, InferenceContext, LlamaServerBackend,
};
pub use cancel::CancelToken;
pub use chat::{
    ChatFlow, ChatMessage, ChatSession, ChatState, FlowSettings, Role, Submission, Transcript,
    WorkerEvent, WorkerEvents,
};
pub use config::{LauncherConfig, TOKEN_LIMIT};
pub use error::{LauncherError, LauncherResult, LoadFailure};
pub use logging::LoggingConfig;
pub use model::{ModelFormat, ModelHandle, ModelReference};
pub use quantize::{QuantFormat, Quantize, QuantizeInvoker};
