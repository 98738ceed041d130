//! Execution backend contract and the shared execution handle.
//!
//! The orchestrator never looks inside a backend. It creates one
//! [`ExecutionHandle`] per run and hands clones of it to every pipeline,
//! which submits [`WorkStep`]s through it and awaits their [`StepOutput`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// A concrete unit of external work issued by a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkStep {
    /// Name of the pipeline that issued the step.
    pub pipeline: String,
    /// Registered name of the step.
    pub name: String,
    /// Shell command to execute.
    pub command: String,
    /// Extra environment variables for the command.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory override.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl WorkStep {
    /// Creates a work step running `command` through the backend's shell.
    pub fn shell(
        pipeline: impl Into<String>,
        name: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            name: name.into(),
            command: command.into(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    /// Adds an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Result of executing a work step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutput {
    /// Name of the step that produced this output.
    pub step: String,
    /// Exit code of the command.
    pub exit_code: i32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Wall-clock duration of the step.
    pub duration: Duration,
}

impl StepOutput {
    /// Creates a successful output with the given stdout.
    pub fn success(step: impl Into<String>, stdout: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            duration: Duration::ZERO,
        }
    }

    /// Returns true if the command exited with code 0.
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    /// Standard output with surrounding whitespace removed.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Backend that actually runs work steps.
///
/// Cancellation is cooperative: when a pipeline is terminated its pending
/// `execute` future is dropped, and backends should stop the work they
/// started when that happens.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Prepares the backend before the first step is submitted.
    async fn initialize(&self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Executes one work step to completion.
    async fn execute(&self, step: WorkStep) -> Result<StepOutput, BackendError>;

    /// Releases backend resources after the run.
    async fn shutdown(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Shared handle pipelines use to submit work steps.
#[derive(Clone)]
pub struct ExecutionHandle {
    backend: Arc<dyn ExecutionBackend>,
    submitted: Arc<AtomicU64>,
}

impl ExecutionHandle {
    /// Initializes `backend` and wraps it in a handle.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the backend fails to initialize.
    pub async fn create(backend: Arc<dyn ExecutionBackend>) -> Result<Self, BackendError> {
        backend.initialize().await?;
        tracing::debug!(backend = backend.name(), "Execution backend initialized");

        Ok(Self {
            backend,
            submitted: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Submits a step and awaits its output.
    pub async fn submit(&self, step: WorkStep) -> Result<StepOutput, BackendError> {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(
            pipeline = %step.pipeline,
            step = %step.name,
            backend = self.backend.name(),
            "Submitting work step"
        );
        self.backend.execute(step).await
    }

    /// Number of steps submitted through this handle.
    pub fn steps_submitted(&self) -> u64 {
        self.submitted.load(Ordering::SeqCst)
    }

    /// Name of the underlying backend.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Shuts the underlying backend down.
    pub async fn shutdown(&self) -> Result<(), BackendError> {
        self.backend.shutdown().await
    }
}

impl std::fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("backend", &self.backend.name())
            .field("steps_submitted", &self.steps_submitted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingInit;

    #[async_trait]
    impl ExecutionBackend for FailingInit {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn initialize(&self) -> Result<(), BackendError> {
            Err(BackendError::Unavailable("no cluster".to_string()))
        }

        async fn execute(&self, step: WorkStep) -> Result<StepOutput, BackendError> {
            Ok(StepOutput::success(step.name, ""))
        }
    }

    struct Echo;

    #[async_trait]
    impl ExecutionBackend for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn execute(&self, step: WorkStep) -> Result<StepOutput, BackendError> {
            Ok(StepOutput::success(step.name, step.command))
        }
    }

    #[test]
    fn test_work_step_builder() {
        let step = WorkStep::shell("p1", "fold", "run-fold --fast")
            .with_env("OMP_NUM_THREADS", "4")
            .with_working_dir("/scratch");

        assert_eq!(step.pipeline, "p1");
        assert_eq!(step.env.get("OMP_NUM_THREADS"), Some(&"4".to_string()));
        assert_eq!(step.working_dir, Some(PathBuf::from("/scratch")));
    }

    #[test]
    fn test_step_output_helpers() {
        let output = StepOutput::success("s1", "  done\n");
        assert!(output.succeeded());
        assert_eq!(output.stdout_trimmed(), "done");
    }

    #[tokio::test]
    async fn test_create_propagates_initialize_failure() {
        let result = ExecutionHandle::create(Arc::new(FailingInit)).await;
        assert!(matches!(result, Err(BackendError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_submit_counts_steps() {
        let handle = ExecutionHandle::create(Arc::new(Echo))
            .await
            .expect("echo backend initializes");

        let output = handle
            .submit(WorkStep::shell("p1", "s1", "hello"))
            .await
            .expect("echo never fails");

        assert_eq!(output.stdout, "hello");
        assert_eq!(handle.steps_submitted(), 1);
        assert_eq!(handle.backend_name(), "echo");
    }
}
