//! Orchestration of dynamically branching pipelines.
//!
//! - **Config**: loop timing and activity summaries
//! - **Events**: typed lifecycle events, logged and forwarded to sinks
//! - **Report**: per-run counters and per-pipeline records
//! - **Manager**: the [`Orchestrator`] and its scheduling loop
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use branchforge::execution::DryRunBackend;
//! use branchforge::orchestrator::{Orchestrator, OrchestratorConfig};
//!
//! let mut orchestrator =
//!     Orchestrator::create(Arc::new(DryRunBackend::new()), OrchestratorConfig::default()).await?;
//! let report = orchestrator.run(descriptors).await?;
//! println!("{} pipelines completed", report.pipelines_completed);
//! ```

pub mod config;
pub mod events;
pub mod manager;
pub mod report;

pub use config::{ConfigError, OrchestratorConfig};
pub use events::{ChannelSink, EventHub, EventSink, LifecycleEvent, MemorySink};
pub use manager::Orchestrator;
pub use report::{CampaignReport, PipelineOutcome, PipelineRecord};
