//! Backend that records work steps instead of running them.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BackendError;

use super::backend::{ExecutionBackend, StepOutput, WorkStep};

/// Builds the canned output for a recorded step.
pub type Responder = Arc<dyn Fn(&WorkStep) -> StepOutput + Send + Sync>;

/// Records every submitted step and answers with a canned output.
///
/// By default every step succeeds with an empty stdout. A responder can be
/// installed to script outputs, and a latency to make steps take time.
#[derive(Clone, Default)]
pub struct DryRunBackend {
    latency: Duration,
    responder: Option<Responder>,
    executed: Arc<Mutex<Vec<WorkStep>>>,
}

impl DryRunBackend {
    /// Creates a backend with no latency and empty successful outputs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every step take `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Installs a responder that produces each step's output.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&WorkStep) -> StepOutput + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(responder));
        self
    }

    /// Steps executed so far, in submission order.
    pub fn executed(&self) -> Vec<WorkStep> {
        self.executed.lock().expect("lock not poisoned").clone()
    }
}

#[async_trait]
impl ExecutionBackend for DryRunBackend {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    async fn execute(&self, step: WorkStep) -> Result<StepOutput, BackendError> {
        self.executed
            .lock()
            .expect("lock not poisoned")
            .push(step.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut output = match &self.responder {
            Some(responder) => responder(&step),
            None => StepOutput::success(&step.name, ""),
        };
        output.duration = self.latency;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_steps_in_order() {
        let backend = DryRunBackend::new();
        backend
            .execute(WorkStep::shell("p1", "a", "echo a"))
            .await
            .expect("dry run never fails");
        backend
            .execute(WorkStep::shell("p2", "b", "echo b"))
            .await
            .expect("dry run never fails");

        let names: Vec<String> = backend.executed().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_responder_scripts_output() {
        let backend = DryRunBackend::new().with_responder(|step| StepOutput {
            step: step.name.clone(),
            exit_code: 1,
            stdout: String::new(),
            stderr: format!("{} failed", step.name),
            duration: Duration::ZERO,
        });

        let output = backend
            .execute(WorkStep::shell("p1", "fold", "fold"))
            .await
            .expect("dry run never fails");
        assert!(!output.succeeded());
        assert_eq!(output.stderr, "fold failed");
    }

    #[tokio::test]
    async fn test_latency_is_reported() {
        let backend = DryRunBackend::new().with_latency(Duration::from_millis(20));
        let start = std::time::Instant::now();
        let output = backend
            .execute(WorkStep::shell("p1", "a", "echo a"))
            .await
            .expect("dry run never fails");
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(output.duration, Duration::from_millis(20));
    }
}
