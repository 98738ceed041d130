//! Error types for branchforge operations.
//!
//! Defines the error types for every subsystem:
//! - Pipeline descriptor validation
//! - Pipeline construction and work-step execution
//! - Execution backends
//! - Campaign file loading
//! - Orchestrator runs

use thiserror::Error;

/// Errors raised while validating a pipeline descriptor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Pipeline name must not be empty")]
    EmptyName,

    #[error("Pipeline name '{0}' has leading or trailing whitespace")]
    UntrimmedName(String),

    #[error("Pipeline '{0}' has no implementation kind")]
    MissingKind(String),

    #[error("Unknown pipeline type '{0}'")]
    UnknownPipelineType(String),

    #[error("Unknown decision procedure '{0}'")]
    UnknownDecision(String),

    #[error("Parameter '{key}' of pipeline '{pipeline}' is reserved")]
    ReservedParameter { pipeline: String, key: String },

    #[error("Invalid parameter '{key}': {message}")]
    InvalidParameter { key: String, message: String },
}

/// Errors raised by pipeline construction and work-step calls.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pipeline construction failed: {0}")]
    Construction(String),

    #[error("Invalid parameter '{key}': {message}")]
    InvalidParameter { key: String, message: String },

    #[error("Work step '{0}' is already registered")]
    DuplicateStep(String),

    #[error("Work step '{0}' is not registered")]
    UnknownStep(String),

    #[error("Work step '{step}' exited with code {code}: {stderr}")]
    StepFailed {
        step: String,
        code: i32,
        stderr: String,
    },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Errors raised by execution backends.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Failed to launch work step '{step}': {source}")]
    Spawn {
        step: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Work step '{step}' timed out after {seconds} seconds")]
    Timeout { step: String, seconds: u64 },

    #[error("Execution backend unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while loading a campaign file.
#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported campaign file extension: {0}")]
    UnsupportedFormat(String),

    #[error("Campaign has no pipelines")]
    Empty,

    #[error("Invalid pipeline in campaign: {0}")]
    Validation(#[from] ValidationError),
}

/// Errors raised by an orchestrator run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Failed to construct pipeline '{name}': {source}")]
    Construction {
        name: String,
        #[source]
        source: PipelineError,
    },

    #[error("Invalid pipeline descriptor: {0}")]
    Validation(#[from] ValidationError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::orchestrator::ConfigError),
}
