//! Stop signal shared between the session and the worker's blocking steps.

use std::{
    process::Child,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, Weak,
    },
};

/// Set once when the application shuts down.
///
/// Quantization and model loading poll it between waits. Server processes
/// registered with [`CancelToken::watch`] are killed the moment it is set, so
/// a request blocked on them fails right away.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    children: Mutex<Vec<Weak<Mutex<Child>>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("cancelling blocking work");
        let children = std::mem::take(&mut *self.children());
        for child in children.iter().filter_map(Weak::upgrade) {
            kill(&child);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Kills `child` on cancellation. Already cancelled: killed now.
    pub(crate) fn watch(&self, child: &Arc<Mutex<Child>>) {
        {
            let mut children = self.children();
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(child));
        }
        if self.is_cancelled() {
            kill(child);
        }
    }

    fn children(&self) -> std::sync::MutexGuard<'_, Vec<Weak<Mutex<Child>>>> {
        self.inner.children.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn kill(child: &Mutex<Child>) {
    let mut child = child.lock().unwrap_or_else(|e| e.into_inner());
    if let Ok(None) = child.try_wait() {
        if let Err(e) = child.kill() {
            tracing::error!(pid = child.id(), error = %e, "failed to kill child on cancel");
        }
    }
}
