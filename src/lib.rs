//! branchforge: orchestration of dynamically branching pipeline campaigns.
//!
//! A campaign is a pool of long-running pipelines. Each pipeline runs shell
//! work steps, pauses to consult a pluggable decision procedure, and may as a
//! result spawn child pipelines or terminate itself early. The orchestrator
//! owns their lifecycles and never reclaims a pipeline while a decision is
//! still in flight for it.

pub mod campaign;
pub mod cli;
pub mod error;
pub mod execution;
pub mod orchestrator;
pub mod pipeline;

// Re-export commonly used types
pub use error::{
    BackendError, CampaignError, OrchestratorError, PipelineError, ValidationError,
};
pub use orchestrator::{CampaignReport, Orchestrator, OrchestratorConfig};
pub use pipeline::{BuildPipeline, DecisionFn, Pipeline, PipelineContext, PipelineDescriptor};
