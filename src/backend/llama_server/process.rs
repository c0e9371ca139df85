use std::{
    ffi::OsString,
    io,
    path::Path,
    process::{Child, Command, Stdio},
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    cancel::CancelToken,
    error::LoadFailure,
    process::{kill_and_reap, OutputTail},
};

const STDERR_TAIL_LINES: usize = 40;

/// A running `llama-server` child. Dropping the guard kills and reaps it.
///
/// The child is shared with the [`CancelToken`], which kills it on shutdown so
/// a request waiting on the server returns at once.
#[derive(Debug)]
pub(crate) struct ServerProcess {
    child: Arc<Mutex<Child>>,
    pid: u32,
    stderr: OutputTail,
}

impl ServerProcess {
    pub(crate) fn spawn(
        executable: &Path,
        args: &[OsString],
        cancel: &CancelToken,
    ) -> Result<Self, LoadFailure> {
        let mut cmd = Command::new(executable);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        // Shared libraries shipped next to the binary are found from its directory.
        if let Some(dir) = executable.parent().filter(|d| d.is_dir()) {
            cmd.current_dir(dir);
        }
        tracing::debug!("Starting server with command: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => LoadFailure::ServerExecutableMissing(executable.to_path_buf()),
            _ => LoadFailure::Backend(format!(
                "failed to start '{}': {e}",
                executable.display()
            )),
        })?;
        let stderr = child
            .stderr
            .take()
            .map(|pipe| OutputTail::capture(pipe, STDERR_TAIL_LINES))
            .unwrap_or_else(OutputTail::empty);
        let pid = child.id();
        tracing::info!(pid, "llama-server started");
        let child = Arc::new(Mutex::new(child));
        cancel.watch(&child);
        Ok(Self { child, pid, stderr })
    }

    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    fn child(&self) -> MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// `Some(diagnostic)` once the process has exited on its own.
    pub(crate) fn exit_report(&mut self) -> Option<String> {
        let status = self.child().try_wait();
        match status {
            Ok(Some(status)) => {
                let status = status
                    .code()
                    .map_or_else(|| "terminated by signal".to_string(), |c| format!("exit code {c}"));
                let tail = self.stderr.snapshot();
                Some(if tail.trim().is_empty() {
                    status
                } else {
                    format!("{status}: {}", tail.trim())
                })
            }
            Ok(None) => None,
            Err(e) => Some(format!("failed to poll server process: {e}")),
        }
    }

    pub(crate) fn stderr_tail(&self) -> String {
        self.stderr.snapshot()
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        let status = kill_and_reap(&mut self.child());
        tracing::info!(pid = self.pid, ?status, "llama-server stopped");
    }
}
