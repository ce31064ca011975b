//! Cancellable listener handles.
//!
//! Every callback a listener task runs goes through a [`Gate`]. Closing the
//! gate waits for an in-flight callback to return and blocks all later ones,
//! so once [`Subscription::unsubscribe`] returns the callback never runs
//! again.

use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Open/closed flag that callbacks run under.
#[derive(Debug)]
pub(crate) struct Gate {
    open: Mutex<bool>,
}

impl Gate {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Gate {
            open: Mutex::new(true),
        })
    }

    /// Runs `f` if the gate is still open.
    pub(crate) fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let open = self.open.lock().unwrap_or_else(|p| p.into_inner());
        if *open {
            Some(f())
        } else {
            None
        }
    }

    pub(crate) fn close(&self) {
        let mut open = self.open.lock().unwrap_or_else(|p| p.into_inner());
        *open = false;
    }

    pub(crate) fn is_open(&self) -> bool {
        *self.open.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Handle to a running listener. Dropping it unsubscribes.
///
/// Do not unsubscribe from inside the subscribed callback itself.
#[derive(Debug)]
pub struct Subscription {
    gate: Arc<Gate>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(gate: Arc<Gate>, task: JoinHandle<()>) -> Self {
        Subscription {
            gate,
            task: Some(task),
        }
    }

    /// A subscription with nothing behind it.
    pub(crate) fn inert() -> Self {
        let gate = Gate::new();
        gate.close();
        Subscription { gate, task: None }
    }

    /// True while callbacks may still be delivered.
    pub fn is_active(&self) -> bool {
        self.gate.is_open() && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.gate.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}
