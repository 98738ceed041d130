//! Per-pipeline context handed to pipeline constructors.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::execution::{ExecutionHandle, StepTable};

use super::contract::PipelineKind;
use super::control::{DecisionBarrier, PipelineControl};
use super::decision::DecisionFn;
use super::descriptor::PipelineDescriptor;
use super::ParamMap;

/// Identifier the orchestrator assigns to each pipeline instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PipelineId(pub u64);

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Everything a pipeline receives at construction time.
#[derive(Clone)]
pub struct PipelineContext {
    id: PipelineId,
    name: String,
    kind: PipelineKind,
    params: ParamMap,
    decision: Option<DecisionFn>,
    parent: Option<String>,
    control: Arc<PipelineControl>,
    engine: ExecutionHandle,
}

impl PipelineContext {
    pub(crate) fn new(
        id: PipelineId,
        descriptor: &PipelineDescriptor,
        parent: Option<String>,
        control: Arc<PipelineControl>,
        engine: ExecutionHandle,
    ) -> Self {
        let (name, params) = descriptor.to_constructor_args();
        Self {
            id,
            name,
            kind: descriptor.kind().clone(),
            params,
            decision: descriptor.decision().cloned(),
            parent,
            control,
            engine,
        }
    }

    /// Orchestrator-assigned identifier.
    pub fn id(&self) -> PipelineId {
        self.id
    }

    /// Pipeline name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Implementation kind this pipeline was built from.
    pub fn kind(&self) -> &PipelineKind {
        &self.kind
    }

    /// Merged constructor parameters.
    pub fn params(&self) -> &ParamMap {
        &self.params
    }

    /// Name of the pipeline whose request spawned this one.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Decision procedure copied from the descriptor.
    pub fn decision(&self) -> Option<&DecisionFn> {
        self.decision.as_ref()
    }

    /// Shared control block.
    pub fn control(&self) -> &Arc<PipelineControl> {
        &self.control
    }

    /// Shared execution handle.
    pub fn engine(&self) -> &ExecutionHandle {
        &self.engine
    }

    /// Reads a typed parameter.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidParameter` when the value exists but
    /// does not deserialize into `T`.
    pub fn param<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, PipelineError> {
        self.params
            .get(key)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|e| PipelineError::InvalidParameter {
                    key: key.to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()
    }

    /// Reads a typed parameter, falling back to `default` when absent.
    pub fn param_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, PipelineError> {
        Ok(self.param(key)?.unwrap_or(default))
    }

    /// Creates an empty work-step table bound to the execution handle.
    pub fn step_table(&self) -> StepTable {
        StepTable::new(&self.name, self.engine.clone())
    }

    /// A descriptor for another pipeline of this kind with the same decision procedure.
    pub fn child_descriptor(&self, name: impl Into<String>) -> PipelineDescriptor {
        PipelineDescriptor::new(name, self.kind.clone()).with_optional_decision(self.decision.clone())
    }

    /// Requests a decision pass and waits until it has finished.
    pub async fn request_decision_and_wait(&self) {
        self.control.request_decision_and_wait().await;
    }

    /// Requests a decision pass; await the returned barrier later.
    pub fn request_decision(&self) -> DecisionBarrier {
        self.control.request_decision()
    }

    /// Asks the orchestrator to start a child pipeline.
    pub fn request_child_spawn(&self, descriptor: PipelineDescriptor) {
        self.control.request_child_spawn(descriptor);
    }

    /// Asks the orchestrator to cancel this pipeline.
    pub fn request_termination(&self) {
        self.control.request_termination();
    }

    /// Returns true once termination has been requested.
    pub fn termination_requested(&self) -> bool {
        self.control.termination_requested()
    }
}

impl fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineContext")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind.name())
            .field("params", &self.params)
            .field("parent", &self.parent)
            .finish_non_exhaustive()
    }
}
