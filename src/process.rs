//! Child-process helpers shared by the quantize invoker and the llama-server backend.

use std::{
    collections::VecDeque,
    io::{BufRead, BufReader, Read},
    process::{Child, ExitStatus},
    sync::{Arc, Mutex},
    thread::JoinHandle,
    time::Duration,
};

use wait_timeout::ChildExt;

const FORCE_KILL_TIMEOUT: Duration = Duration::from_secs(2);

/// Keeps the last `max_lines` lines written to a child's pipe.
///
/// The pipe is drained on its own thread so a chatty child never blocks on a
/// full pipe while we wait for it.
#[derive(Debug)]
pub(crate) struct OutputTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    reader: Option<JoinHandle<()>>,
}

impl OutputTail {
    pub(crate) fn capture<R: Read + Send + 'static>(source: R, max_lines: usize) -> Self {
        let lines = Arc::new(Mutex::new(VecDeque::with_capacity(max_lines)));
        let sink = Arc::clone(&lines);
        let reader = std::thread::Builder::new()
            .name("child-output".to_string())
            .spawn(move || {
                for line in BufReader::new(source).lines() {
                    let Ok(line) = line else { break };
                    let mut lines = sink.lock().unwrap_or_else(|e| e.into_inner());
                    if lines.len() == max_lines {
                        lines.pop_front();
                    }
                    lines.push_back(line);
                }
            })
            .ok();
        Self { lines, reader }
    }

    pub(crate) fn empty() -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::new())),
            reader: None,
        }
    }

    pub(crate) fn snapshot(&self) -> String {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Waits for the pipe to close, then returns what was kept.
    pub(crate) fn finish(mut self) -> String {
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        self.snapshot()
    }
}

/// Kills `child` and reaps it, giving the OS a short window to deliver the signal.
pub(crate) fn kill_and_reap(child: &mut Child) -> Option<ExitStatus> {
    if let Ok(Some(status)) = child.try_wait() {
        return Some(status);
    }
    if let Err(e) = child.kill() {
        tracing::error!(pid = child.id(), error = %e, "failed to kill child process");
    }
    match child.wait_timeout(FORCE_KILL_TIMEOUT) {
        Ok(status) => status,
        Err(e) => {
            tracing::error!(pid = child.id(), error = %e, "failed to reap child process");
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::{Path, PathBuf};

    use super::*;

    /// Writes an executable `sh` script into `dir`.
    #[cfg(unix)]
    pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn tail_keeps_only_the_last_lines() {
        let input = (1..=30).map(|i| format!("line {i}\n")).collect::<String>();
        let tail = OutputTail::capture(std::io::Cursor::new(input.into_bytes()), 3);
        assert_eq!(tail.finish(), "line 28\nline 29\nline 30");
    }

    #[test]
    fn empty_tail() {
        assert_eq!(OutputTail::empty().finish(), "");
    }

    #[cfg(unix)]
    #[test]
    #[serial_test::serial]
    fn kill_and_reap_stops_a_sleeping_child() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let status = kill_and_reap(&mut child).expect("child should be reaped");
        assert!(!status.success());
    }
}
