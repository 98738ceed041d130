//! Pipeline lifecycle contract.
//!
//! This module defines what the orchestrator needs from a pipeline and
//! what it gives back:
//!
//! - **Descriptor**: validated recipe for one pipeline instance
//! - **Contract**: the [`Pipeline`] trait and typed [`PipelineKind`] factories
//! - **Control**: request flags, the child-request slot and the decision barrier
//! - **Context**: per-instance handle to parameters, control and execution
//! - **Decision**: pluggable decision procedures ([`DecisionFn`])
//! - **Registry**: name-based lookup used by campaign files
//!
//! # Decision handshake
//!
//! ```text
//!   run routine                      orchestrator
//!   ───────────                      ────────────
//!   request_decision_and_wait() ──►  sees invoke flag, starts decision pass
//!        (suspended)                 decision_fn(pipeline) runs
//!        (suspended)                 flag cleared, barrier reopened
//!   resumes                     ◄──
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use branchforge::pipeline::{BuildPipeline, Pipeline, PipelineContext, PipelineDescriptor};
//!
//! struct Fold { ctx: PipelineContext, steps: StepTable }
//!
//! #[async_trait]
//! impl Pipeline for Fold {
//!     fn context(&self) -> &PipelineContext { &self.ctx }
//!     fn register_work_steps(&mut self) -> Result<(), PipelineError> {
//!         self.steps.register("fold", |_| "run-fold".to_string())
//!     }
//!     async fn run(&self) -> anyhow::Result<()> {
//!         self.steps.call("fold").await?;
//!         self.ctx.request_decision_and_wait().await;
//!         Ok(())
//!     }
//! }
//!
//! let descriptor = PipelineDescriptor::of::<Fold>("p1").with_param("depth", 3);
//! ```

pub mod context;
pub mod contract;
pub mod control;
pub mod decision;
pub mod descriptor;
pub mod registry;

/// Constructor parameters: string keys, JSON values.
pub type ParamMap = serde_json::Map<String, serde_json::Value>;

pub use context::{PipelineContext, PipelineId};
pub use contract::{AsAny, BuildPipeline, Pipeline, PipelineFactory, PipelineKind, PipelineScores};
pub use control::{DecisionBarrier, PipelineControl};
pub use decision::DecisionFn;
pub use descriptor::PipelineDescriptor;
pub use registry::Registry;

#[cfg(test)]
pub(crate) mod testing {
    //! Minimal pipelines for unit tests.

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::error::PipelineError;
    use crate::execution::{DryRunBackend, ExecutionHandle};

    /// Does nothing; records whether its steps were registered.
    pub struct NoopPipeline {
        ctx: PipelineContext,
        registered: AtomicBool,
    }

    impl NoopPipeline {
        pub fn steps_registered(&self) -> bool {
            self.registered.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Pipeline for NoopPipeline {
        fn context(&self) -> &PipelineContext {
            &self.ctx
        }

        fn register_work_steps(&mut self) -> Result<(), PipelineError> {
            self.registered.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn run(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    impl BuildPipeline for NoopPipeline {
        const KIND: &'static str = "noop";

        fn build(ctx: PipelineContext) -> Result<Self, PipelineError> {
            Ok(Self {
                ctx,
                registered: AtomicBool::new(false),
            })
        }
    }

    /// A second type, for downcast mismatches.
    pub struct OtherPipeline {
        ctx: PipelineContext,
    }

    #[async_trait]
    impl Pipeline for OtherPipeline {
        fn context(&self) -> &PipelineContext {
            &self.ctx
        }

        fn register_work_steps(&mut self) -> Result<(), PipelineError> {
            Ok(())
        }

        async fn run(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    impl BuildPipeline for OtherPipeline {
        const KIND: &'static str = "other";

        fn build(ctx: PipelineContext) -> Result<Self, PipelineError> {
            Ok(Self { ctx })
        }
    }

    pub async fn test_context_with(descriptor: &PipelineDescriptor) -> PipelineContext {
        let engine = ExecutionHandle::create(Arc::new(DryRunBackend::new()))
            .await
            .expect("dry-run backend initializes");
        let control = Arc::new(PipelineControl::new(Arc::new(Notify::new())));
        PipelineContext::new(PipelineId(1), descriptor, None, control, engine)
    }

    pub async fn test_context(name: &str) -> PipelineContext {
        test_context_with(&PipelineDescriptor::of::<NoopPipeline>(name)).await
    }

    pub async fn test_pipeline<P: BuildPipeline>(name: &str) -> Arc<dyn Pipeline> {
        let descriptor = PipelineDescriptor::of::<P>(name);
        let ctx = test_context_with(&descriptor).await;
        descriptor
            .kind()
            .construct(ctx)
            .expect("test pipeline builds")
    }
}
