//! Control block shared between a pipeline and the orchestrator.
//!
//! Each field has a single writer for each transition: the pipeline (or a
//! decision procedure acting on it) raises requests, the orchestrator clears
//! them. The only locks guard the child-request slot and the list of
//! decision waiters, and are never held across an await.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, Notify};
use tracing::warn;

use super::descriptor::PipelineDescriptor;

/// Flags and signals a running pipeline uses to talk to the orchestrator.
#[derive(Debug)]
pub struct PipelineControl {
    invoke_decision: AtomicBool,
    terminate: AtomicBool,
    pending_child: Mutex<Option<PipelineDescriptor>>,
    decision_waiters: Mutex<Vec<oneshot::Sender<()>>>,
    wake: Arc<Notify>,
}

impl PipelineControl {
    /// Creates a control block that wakes `wake` whenever a request is raised.
    pub fn new(wake: Arc<Notify>) -> Self {
        Self {
            invoke_decision: AtomicBool::new(false),
            terminate: AtomicBool::new(false),
            pending_child: Mutex::new(None),
            decision_waiters: Mutex::new(Vec::new()),
            wake,
        }
    }

    /// Asks for a decision pass and returns the barrier that opens when it finishes.
    ///
    /// Requests raised while a pass is already in flight join that pass.
    pub fn request_decision(&self) -> DecisionBarrier {
        let (tx, rx) = oneshot::channel();
        // The waiter must be registered before the flag becomes visible.
        self.decision_waiters
            .lock()
            .expect("lock not poisoned")
            .push(tx);
        self.invoke_decision.store(true, Ordering::SeqCst);
        self.wake.notify_one();
        DecisionBarrier { rx }
    }

    /// Asks for a decision pass and suspends until it has finished.
    pub async fn request_decision_and_wait(&self) {
        self.request_decision().wait().await;
    }

    /// Returns true while a decision pass is requested and not yet finished.
    pub fn decision_requested(&self) -> bool {
        self.invoke_decision.load(Ordering::SeqCst)
    }

    /// Returns true if no caller is suspended on the decision barrier.
    pub fn barrier_open(&self) -> bool {
        self.decision_waiters
            .lock()
            .expect("lock not poisoned")
            .is_empty()
    }

    /// Clears the decision request and reopens the barrier.
    pub(crate) fn finish_decision(&self) {
        self.invoke_decision.store(false, Ordering::SeqCst);
        let waiters = std::mem::take(&mut *self.decision_waiters.lock().expect("lock not poisoned"));
        for waiter in waiters {
            // The waiting side may already be gone (cancelled run routine).
            let _ = waiter.send(());
        }
    }

    /// Stores a child-pipeline request, replacing any request not yet harvested.
    pub fn request_child_spawn(&self, descriptor: PipelineDescriptor) {
        let previous = self
            .pending_child
            .lock()
            .expect("lock not poisoned")
            .replace(descriptor);
        if let Some(dropped) = previous {
            warn!(
                child = dropped.name(),
                "Unharvested child request replaced by a newer one"
            );
        }
        self.wake.notify_one();
    }

    /// Takes the pending child request, leaving the slot empty.
    pub fn take_child_request(&self) -> Option<PipelineDescriptor> {
        self.pending_child.lock().expect("lock not poisoned").take()
    }

    /// Returns true if a child request is waiting to be harvested.
    pub fn has_child_request(&self) -> bool {
        self.pending_child
            .lock()
            .expect("lock not poisoned")
            .is_some()
    }

    /// Requests forced termination of the pipeline.
    pub fn request_termination(&self) {
        self.terminate.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Returns true once termination has been requested.
    pub fn termination_requested(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }
}

/// One decision cycle's barrier.
///
/// A fresh barrier is created per request, so a stale wakeup from an
/// earlier cycle can never release a later one.
#[derive(Debug)]
#[must_use = "a decision barrier does nothing unless awaited"]
pub struct DecisionBarrier {
    rx: oneshot::Receiver<()>,
}

impl DecisionBarrier {
    /// Waits until the decision pass finishes.
    pub async fn wait(self) {
        // A dropped sender means the control block is gone; the barrier is open.
        let _ = self.rx.await;
    }
}

/// Reopens the barrier when a decision pass ends, however it ends.
pub(crate) struct DecisionGuard {
    control: Arc<PipelineControl>,
}

impl DecisionGuard {
    pub(crate) fn new(control: Arc<PipelineControl>) -> Self {
        Self { control }
    }
}

impl Drop for DecisionGuard {
    fn drop(&mut self) {
        self.control.finish_decision();
    }
}
