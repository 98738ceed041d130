//! Per-pipeline table of named work-step bodies.
//!
//! A pipeline wires its steps once, at construction time, by registering a
//! body per step name. A body turns call arguments into the shell command
//! that the execution backend runs. Registration never touches the backend.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::PipelineError;
use crate::pipeline::ParamMap;

use super::backend::{ExecutionHandle, StepOutput, WorkStep};

/// Produces the shell command for a step from its call arguments.
pub type StepBody = Arc<dyn Fn(&ParamMap) -> String + Send + Sync>;

/// Named work steps bound to an execution handle.
pub struct StepTable {
    pipeline: String,
    engine: ExecutionHandle,
    bodies: HashMap<String, StepBody>,
}

impl StepTable {
    /// Creates an empty table for the named pipeline.
    pub fn new(pipeline: impl Into<String>, engine: ExecutionHandle) -> Self {
        Self {
            pipeline: pipeline.into(),
            engine,
            bodies: HashMap::new(),
        }
    }

    /// Registers a step body under `name`.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::DuplicateStep` if the name is taken.
    pub fn register<F>(&mut self, name: impl Into<String>, body: F) -> Result<(), PipelineError>
    where
        F: Fn(&ParamMap) -> String + Send + Sync + 'static,
    {
        let name = name.into();
        if self.bodies.contains_key(&name) {
            return Err(PipelineError::DuplicateStep(name));
        }
        self.bodies.insert(name, Arc::new(body));
        Ok(())
    }

    /// Returns true if a step with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.bodies.contains_key(name)
    }

    /// Registered step names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.bodies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Runs a step with no arguments.
    pub async fn call(&self, name: &str) -> Result<StepOutput, PipelineError> {
        self.call_with(name, &ParamMap::new()).await
    }

    /// Runs a step with the given arguments and waits for its output.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::UnknownStep` for unregistered names,
    /// `PipelineError::StepFailed` when the command exits non-zero, and
    /// `PipelineError::Backend` when the backend itself fails.
    pub async fn call_with(&self, name: &str, args: &ParamMap) -> Result<StepOutput, PipelineError> {
        let body = self
            .bodies
            .get(name)
            .ok_or_else(|| PipelineError::UnknownStep(name.to_string()))?;

        let step = WorkStep::shell(&self.pipeline, name, body(args));
        let output = self.engine.submit(step).await?;

        if !output.succeeded() {
            return Err(PipelineError::StepFailed {
                step: name.to_string(),
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        Ok(output)
    }
}

/// Reads a string argument, falling back to `default`.
pub fn arg_str<'a>(args: &'a ParamMap, key: &str, default: &'a str) -> &'a str {
    args.get(key).and_then(Value::as_str).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::DryRunBackend;

    async fn dry_run_table() -> (StepTable, Arc<DryRunBackend>) {
        let backend = Arc::new(DryRunBackend::new());
        let engine = ExecutionHandle::create(backend.clone())
            .await
            .expect("dry-run backend initializes");
        (StepTable::new("p1", engine), backend)
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates() {
        let (mut table, _) = dry_run_table().await;
        table
            .register("fold", |_| "echo fold".to_string())
            .expect("first registration succeeds");

        let err = table
            .register("fold", |_| "echo again".to_string())
            .unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateStep(name) if name == "fold"));
    }

    #[tokio::test]
    async fn test_call_unknown_step() {
        let (table, _) = dry_run_table().await;
        let err = table.call("missing").await.unwrap_err();
        assert!(matches!(err, PipelineError::UnknownStep(_)));
    }

    #[tokio::test]
    async fn test_call_renders_command_from_args() {
        let (mut table, backend) = dry_run_table().await;
        table
            .register("greet", |args| {
                format!("echo hello {}", arg_str(args, "who", "world"))
            })
            .expect("registration succeeds");

        let mut args = ParamMap::new();
        args.insert("who".to_string(), Value::from("ada"));
        table.call_with("greet", &args).await.expect("dry run succeeds");
        table.call("greet").await.expect("dry run succeeds");

        let commands: Vec<String> = backend
            .executed()
            .into_iter()
            .map(|step| step.command)
            .collect();
        assert_eq!(commands, vec!["echo hello ada", "echo hello world"]);
    }

    #[tokio::test]
    async fn test_names_are_sorted() {
        let (mut table, _) = dry_run_table().await;
        table.register("b", |_| String::new()).expect("ok");
        table.register("a", |_| String::new()).expect("ok");
        assert_eq!(table.names(), vec!["a", "b"]);
        assert!(table.contains("a"));
    }
}
