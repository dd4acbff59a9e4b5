//! Dedicated hook thread.
//!
//! Lifecycle hooks and sink callbacks all run on one named OS thread, in the order
//! they were dispatched. A panicking hook is logged and does not take the thread down.

use crate::error::SystemResult;
use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

type Hook = Box<dyn FnOnce() + Send + 'static>;

struct HookThread {
    name: String,
    thread_id: ThreadId,
    sender: Mutex<Option<Sender<Hook>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Serial executor backed by a single OS thread
///
/// Clones share the same thread.
#[derive(Clone)]
pub struct HookExecutor {
    inner: Arc<HookThread>,
}

impl HookExecutor {
    pub fn start(name: &str) -> SystemResult<Self> {
        let (sender, receiver) = channel::unbounded::<Hook>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for hook in receiver.iter() {
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(hook)) {
                        error!(panic = %panic_message(payload.as_ref()), "Lifecycle hook panicked");
                    }
                }
                debug!("Hook thread drained and stopped");
            })?;

        debug!(thread = name, "Hook thread started");
        Ok(Self {
            inner: Arc::new(HookThread {
                name: name.to_string(),
                thread_id: handle.thread().id(),
                sender: Mutex::new(Some(sender)),
                handle: Mutex::new(Some(handle)),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn thread_id(&self) -> ThreadId {
        self.inner.thread_id
    }

    pub fn is_hook_thread(&self) -> bool {
        thread::current().id() == self.inner.thread_id
    }

    pub fn is_running(&self) -> bool {
        self.inner.sender.lock().is_some()
    }

    /// Queue `hook` for the hook thread
    ///
    /// After [`shutdown`](Self::shutdown) the hook runs inline on the caller.
    pub fn dispatch(&self, hook: impl FnOnce() + Send + 'static) {
        let hook: Hook = Box::new(hook);
        let rejected = match self.inner.sender.lock().as_ref() {
            Some(sender) => sender.send(hook).err().map(|e| e.into_inner()),
            None => Some(hook),
        };

        if let Some(hook) = rejected {
            warn!(thread = %self.inner.name, "Hook thread stopped; running hook inline");
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(hook)) {
                error!(panic = %panic_message(payload.as_ref()), "Lifecycle hook panicked");
            }
        }
    }

    /// Run `f` on the hook thread and wait for its return value
    ///
    /// `None` if `f` panicked.
    pub async fn run<R>(&self, f: impl FnOnce() -> R + Send + 'static) -> Option<R>
    where
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.dispatch(move || {
            let _ = tx.send(f());
        });
        rx.await.ok()
    }

    /// Stop accepting hooks, drain the queue and join the thread
    ///
    /// Blocks the caller. Safe to call more than once.
    pub fn shutdown(&self) {
        drop(self.inner.sender.lock().take());

        if self.is_hook_thread() {
            return;
        }
        if let Some(handle) = self.inner.handle.lock().take() {
            if handle.join().is_err() {
                error!(thread = %self.inner.name, "Hook thread terminated abnormally");
            }
        }
    }
}

impl fmt::Debug for HookExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookExecutor")
            .field("name", &self.inner.name)
            .field("thread_id", &self.inner.thread_id)
            .field("running", &self.is_running())
            .finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
