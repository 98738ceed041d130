//! Local process execution backend.
//!
//! Runs each work step as `<shell> -c <command>` through `tokio::process`,
//! bounded by a semaphore. Child processes are killed when their future is
//! dropped, so terminating a pipeline also stops the work it had in flight.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::BackendError;
use crate::orchestrator::config::{parse_env_value, ConfigError};

use super::backend::{ExecutionBackend, StepOutput, WorkStep};

/// Configuration for [`ProcessBackend`].
#[derive(Debug, Clone)]
pub struct ProcessBackendConfig {
    /// Shell used to interpret step commands.
    pub shell: String,
    /// Maximum number of steps running at once.
    pub max_concurrent_steps: usize,
    /// Per-step timeout, if any.
    pub step_timeout: Option<Duration>,
    /// Default working directory for steps.
    pub working_dir: Option<PathBuf>,
}

impl Default for ProcessBackendConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            max_concurrent_steps: 8,
            step_timeout: None,
            working_dir: None,
        }
    }
}

impl ProcessBackendConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BRANCHFORGE_SHELL`: Shell for step commands (default: sh)
    /// - `BRANCHFORGE_MAX_CONCURRENT_STEPS`: Concurrent step limit (default: 8)
    /// - `BRANCHFORGE_STEP_TIMEOUT_SECS`: Per-step timeout (default: none)
    /// - `BRANCHFORGE_WORKING_DIR`: Default working directory (default: none)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("BRANCHFORGE_SHELL") {
            config.shell = val;
        }

        if let Ok(val) = std::env::var("BRANCHFORGE_MAX_CONCURRENT_STEPS") {
            config.max_concurrent_steps =
                parse_env_value(&val, "BRANCHFORGE_MAX_CONCURRENT_STEPS")?;
        }

        if let Ok(val) = std::env::var("BRANCHFORGE_STEP_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "BRANCHFORGE_STEP_TIMEOUT_SECS")?;
            config.step_timeout = Some(Duration::from_secs(secs));
        }

        if let Ok(val) = std::env::var("BRANCHFORGE_WORKING_DIR") {
            config.working_dir = Some(PathBuf::from(val));
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shell.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "shell cannot be empty".to_string(),
            ));
        }

        if self.max_concurrent_steps == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_steps must be greater than 0".to_string(),
            ));
        }

        if self.step_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::ValidationFailed(
                "step_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Sets the shell.
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Sets the concurrent step limit.
    pub fn with_max_concurrent_steps(mut self, max: usize) -> Self {
        self.max_concurrent_steps = max;
        self
    }

    /// Sets the per-step timeout.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    /// Sets the default working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Runs work steps as local child processes.
pub struct ProcessBackend {
    config: ProcessBackendConfig,
    limiter: Arc<Semaphore>,
}

impl ProcessBackend {
    /// Creates a backend from a validated configuration.
    pub fn new(config: ProcessBackendConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let limiter = Arc::new(Semaphore::new(config.max_concurrent_steps));
        Ok(Self { config, limiter })
    }

    /// Gets the current configuration.
    pub fn config(&self) -> &ProcessBackendConfig {
        &self.config
    }

    async fn run_command(&self, step: &WorkStep) -> Result<StepOutput, BackendError> {
        let mut command = Command::new(&self.config.shell);
        command
            .arg("-c")
            .arg(&step.command)
            .envs(&step.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = step.working_dir.as_ref().or(self.config.working_dir.as_ref()) {
            command.current_dir(dir);
        }

        let start = Instant::now();
        let output = command.output().await.map_err(|source| BackendError::Spawn {
            step: step.name.clone(),
            source,
        })?;

        Ok(StepOutput {
            step: step.name.clone(),
            // Signal-terminated processes have no exit code.
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: start.elapsed(),
        })
    }
}

#[async_trait]
impl ExecutionBackend for ProcessBackend {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn execute(&self, step: WorkStep) -> Result<StepOutput, BackendError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|e| BackendError::Unavailable(format!("Step limiter closed: {}", e)))?;

        debug!(pipeline = %step.pipeline, step = %step.name, "Launching work step");

        match self.config.step_timeout {
            Some(limit) => tokio::time::timeout(limit, self.run_command(&step))
                .await
                .map_err(|_| BackendError::Timeout {
                    step: step.name.clone(),
                    seconds: limit.as_secs(),
                })?,
            None => self.run_command(&step).await,
        }
    }

    async fn shutdown(&self) -> Result<(), BackendError> {
        self.limiter.close();
        Ok(())
    }
}
