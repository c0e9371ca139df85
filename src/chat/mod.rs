//! Chat: the state machine, its worker thread and the session gluing them.

pub mod flow;
pub mod session;
pub mod transcript;
pub mod worker;

pub use flow::{ChatFlow, ChatJob, ChatState, FlowSettings, Submission};
pub use session::ChatSession;
pub use transcript::{ChatMessage, Role, Transcript, STOP_SEQUENCE};
pub use worker::{WorkerEvent, WorkerEvents, WorkerRequest};
