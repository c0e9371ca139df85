use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use byteorder::{LittleEndian, WriteBytesExt};
use llama_launcher::*;

/// GGUF v3 header carrying only `general.file_type`.
pub fn gguf_bytes(file_type: u32) -> Vec<u8> {
    let key = "general.file_type";
    let mut buf = Vec::new();
    buf.extend_from_slice(b"GGUF");
    buf.write_u32::<LittleEndian>(3).unwrap();
    buf.write_u64::<LittleEndian>(0).unwrap();
    buf.write_u64::<LittleEndian>(1).unwrap();
    buf.write_u64::<LittleEndian>(key.len() as u64).unwrap();
    buf.extend_from_slice(key.as_bytes());
    buf.write_u32::<LittleEndian>(4).unwrap();
    buf.write_u32::<LittleEndian>(file_type).unwrap();
    buf
}

pub fn write_model(dir: &Path, name: &str, file_type: u32) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, gguf_bytes(file_type)).unwrap();
    path
}

/// Writes an executable `sh` script into `dir`.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A `llama-quantize` stand-in that writes a bare GGUF header to the output path.
#[cfg(unix)]
pub fn fake_quantizer(dir: &Path) -> QuantizeInvoker {
    let exe = write_script(
        dir,
        "llama-quantize",
        r#"printf 'GGUF\003\000\000\000' > "$2""#,
    );
    QuantizeInvoker::new(exe, Duration::from_secs(20))
}

pub fn missing_quantizer(dir: &Path) -> QuantizeInvoker {
    QuantizeInvoker::new(dir.join("llama_app").join("llama-quantize"), Duration::from_secs(20))
}

/// Switches the process working directory until dropped.
pub struct WorkingDir(PathBuf);

impl WorkingDir {
    pub fn enter(dir: &Path) -> Self {
        let previous = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir).unwrap();
        Self(previous)
    }
}

impl Drop for WorkingDir {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.0);
    }
}

/// What the fake backend saw.
#[derive(Default, Clone)]
pub struct Probe {
    pub loads: Arc<AtomicUsize>,
    pub alive: Arc<AtomicUsize>,
    pub max_alive: Arc<AtomicUsize>,
    pub loaded_paths: Arc<Mutex<Vec<PathBuf>>>,
    pub requests: Arc<Mutex<Vec<GenerationRequest>>>,
}

impl Probe {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn alive(&self) -> usize {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn max_alive(&self) -> usize {
        self.max_alive.load(Ordering::SeqCst)
    }

    pub fn loaded_paths(&self) -> Vec<PathBuf> {
        self.loaded_paths.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

pub struct FakeBackend {
    probe: Probe,
    reply: String,
    /// Token count reported per completion; `None` reports a plausible count.
    tokens: Option<u32>,
}

impl FakeBackend {
    pub fn new(reply: &str) -> (Self, Probe) {
        let probe = Probe::default();
        let backend = Self {
            probe: probe.clone(),
            reply: reply.to_string(),
            tokens: None,
        };
        (backend, probe)
    }

    pub fn reporting_tokens(mut self, tokens: u32) -> Self {
        self.tokens = Some(tokens);
        self
    }
}

#[derive(Debug)]
pub struct FakeContext {
    alive: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
    reply: String,
    tokens: Option<u32>,
}

impl InferenceBackend for FakeBackend {
    type Context = FakeContext;

    fn load(
        &self,
        reference: &ModelReference,
        _cancel: &CancelToken,
    ) -> LauncherResult<FakeContext> {
        self.probe.loads.fetch_add(1, Ordering::SeqCst);
        self.probe
            .loaded_paths
            .lock()
            .unwrap()
            .push(reference.path.clone());
        let alive = self.probe.alive.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_alive.fetch_max(alive, Ordering::SeqCst);
        Ok(FakeContext {
            alive: Arc::clone(&self.probe.alive),
            requests: Arc::clone(&self.probe.requests),
            reply: self.reply.clone(),
            tokens: self.tokens,
        })
    }
}

impl InferenceContext for FakeContext {
    fn generate(&mut self, request: &GenerationRequest) -> LauncherResult<Completion> {
        self.requests.lock().unwrap().push(request.clone());
        let tokens = self
            .tokens
            .unwrap_or_else(|| (self.reply.split_whitespace().count() as u32).min(request.max_tokens));
        Ok(Completion {
            text: format!(" {}\n", self.reply),
            tokens_generated: tokens,
            hit_token_limit: tokens == request.max_tokens,
        })
    }
}

impl Drop for FakeContext {
    fn drop(&mut self) {
        self.alive.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn session<Q: Quantize + 'static>(backend: FakeBackend, quantizer: Q) -> (ChatSession, WorkerEvents) {
    let mut session =
        ChatSession::with_worker(backend, quantizer, FlowSettings::default()).unwrap();
    let events = session.take_events().unwrap();
    (session, events)
}

/// Feeds worker events into the session until the exchange ends.
pub async fn settle(session: &mut ChatSession, events: &mut WorkerEvents) -> Vec<WorkerEvent> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(20), events.recv())
            .await
            .expect("worker went quiet")
            .expect("worker stopped");
        session.apply(&event);
        let done = matches!(event, WorkerEvent::Replied { .. } | WorkerEvent::Failed(_));
        seen.push(event);
        if done {
            return seen;
        }
    }
}
