//! Execution layer for pipeline work steps.
//!
//! The orchestrator treats the backend as opaque: it creates one shared
//! [`ExecutionHandle`] per run, and pipelines submit named work steps
//! through their [`StepTable`].
//!
//! # Backends
//!
//! - [`ProcessBackend`]: runs steps as local shell processes
//! - [`DryRunBackend`]: records steps and answers with canned output
//!
//! # Example
//!
//! ```ignore
//! use branchforge::execution::{ExecutionHandle, ProcessBackend, ProcessBackendConfig, StepTable};
//!
//! let backend = ProcessBackend::new(ProcessBackendConfig::default())?;
//! let engine = ExecutionHandle::create(std::sync::Arc::new(backend)).await?;
//!
//! let mut steps = StepTable::new("p1", engine);
//! steps.register("fold", |_| "echo folding".to_string())?;
//! let output = steps.call("fold").await?;
//! ```

pub mod backend;
pub mod dry_run;
pub mod process;
pub mod steps;

pub use backend::{ExecutionBackend, ExecutionHandle, StepOutput, WorkStep};
pub use dry_run::{DryRunBackend, Responder};
pub use process::{ProcessBackend, ProcessBackendConfig};
pub use steps::{arg_str, StepBody, StepTable};
