//! The pipeline capability contract and typed pipeline factories.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

use super::context::PipelineContext;

/// Upcast support so decision procedures can recover a concrete pipeline type.
pub trait AsAny: Any + Send + Sync {
    /// Converts an `Arc<Self>` into an `Arc<dyn Any>`.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Current and previous scores reported by a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineScores {
    /// Scores from the latest evaluation.
    pub current: BTreeMap<String, f64>,
    /// Scores the pipeline was started with.
    pub previous: BTreeMap<String, f64>,
}

/// A unit of orchestrated work.
///
/// Implementations hold the [`PipelineContext`] they were built with and use
/// it for the inherited operations: decision handshakes, child-spawn
/// requests and self-termination. State that a decision procedure mutates
/// while the run routine is suspended must use interior mutability.
#[async_trait]
pub trait Pipeline: AsAny {
    /// The context this pipeline was built with.
    fn context(&self) -> &PipelineContext;

    /// Wires named work steps. Called once, before `run` is scheduled.
    fn register_work_steps(&mut self) -> Result<(), PipelineError>;

    /// Main routine, run as an independent task.
    async fn run(&self) -> anyhow::Result<()>;

    /// Domain scores for decision procedures.
    async fn scores(&self) -> PipelineScores {
        PipelineScores::default()
    }

    /// Domain bookkeeping after the pipeline's work is done.
    async fn finalize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Pipeline name.
    fn name(&self) -> &str {
        self.context().name()
    }
}

/// A pipeline type that can construct itself from a context.
pub trait BuildPipeline: Pipeline + Sized {
    /// Registry name of this pipeline type.
    const KIND: &'static str;

    /// Builds an instance. Work steps are registered afterwards.
    fn build(ctx: PipelineContext) -> Result<Self, PipelineError>;
}

/// Constructs a boxed pipeline from its context.
pub type PipelineFactory =
    Arc<dyn Fn(PipelineContext) -> Result<Box<dyn Pipeline>, PipelineError> + Send + Sync>;

/// A named, typed pipeline factory.
#[derive(Clone)]
pub struct PipelineKind {
    name: String,
    factory: PipelineFactory,
}

impl PipelineKind {
    /// The kind for a self-building pipeline type.
    pub fn of<P: BuildPipeline>() -> Self {
        Self {
            name: P::KIND.to_string(),
            factory: Arc::new(|ctx| Ok(Box::new(P::build(ctx)?) as Box<dyn Pipeline>)),
        }
    }

    /// A kind backed by an arbitrary factory closure.
    pub fn from_fn<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(PipelineContext) -> Result<Box<dyn Pipeline>, PipelineError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
        }
    }

    /// Registry name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builds a pipeline and registers its work steps.
    pub(crate) fn construct(&self, ctx: PipelineContext) -> Result<Arc<dyn Pipeline>, PipelineError> {
        let mut pipeline = (self.factory)(ctx)?;
        pipeline.register_work_steps()?;
        Ok(Arc::from(pipeline))
    }
}

impl std::fmt::Debug for PipelineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PipelineKind").field(&self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{test_context, NoopPipeline};

    #[tokio::test]
    async fn test_kind_of_uses_type_name() {
        let kind = PipelineKind::of::<NoopPipeline>();
        assert_eq!(kind.name(), "noop");
        assert_eq!(format!("{:?}", kind), "PipelineKind(\"noop\")");
    }

    #[tokio::test]
    async fn test_construct_registers_work_steps() {
        let kind = PipelineKind::of::<NoopPipeline>();
        let pipeline = kind
            .construct(test_context("p1").await)
            .expect("noop builds");

        let noop = <dyn Pipeline as AsAny>::into_any(pipeline)
            .downcast::<NoopPipeline>()
            .expect("concrete type recovered");
        assert!(noop.steps_registered());
    }

    #[tokio::test]
    async fn test_from_fn_factory_errors_propagate() {
        let kind = PipelineKind::from_fn("broken", |_| {
            Err(PipelineError::Construction("bad input".to_string()))
        });
        let result = kind.construct(test_context("p1").await);
        assert!(matches!(result, Err(PipelineError::Construction(_))));
    }

    #[tokio::test]
    async fn test_default_scores_and_finalize() {
        let pipeline = NoopPipeline::build(test_context("p1").await).expect("builds");
        assert_eq!(pipeline.scores().await, PipelineScores::default());
        assert!(pipeline.finalize().await.is_ok());
        assert_eq!(pipeline.name(), "p1");
    }
}
