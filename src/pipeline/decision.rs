//! Decision procedures (adaptive functions).
//!
//! A decision procedure is an async callable that receives the pipeline
//! instance and communicates purely through side effects on it: requesting
//! a child spawn, requesting termination, or mutating pipeline state the run
//! routine reads once its barrier reopens.

use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use super::contract::{AsAny, Pipeline};

type DecisionBody = dyn Fn(Arc<dyn Pipeline>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// A named, shareable decision procedure.
#[derive(Clone)]
pub struct DecisionFn {
    name: Arc<str>,
    body: Arc<DecisionBody>,
}

impl DecisionFn {
    /// Wraps a procedure that works on any pipeline.
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<dyn Pipeline>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            body: Arc::new(move |pipeline: Arc<dyn Pipeline>| f(pipeline).boxed()),
        }
    }

    /// Wraps a procedure written against a concrete pipeline type.
    ///
    /// Invoking it on a pipeline of another type fails the decision pass.
    pub fn for_pipeline<P, F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        P: Pipeline,
        F: Fn(Arc<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let f = Arc::new(f);
        Self::new(name, move |pipeline: Arc<dyn Pipeline>| {
            let f = Arc::clone(&f);
            async move {
                let actual = pipeline.name().to_string();
                let typed = <dyn Pipeline as AsAny>::into_any(pipeline)
                    .downcast::<P>()
                    .map_err(|_| {
                        anyhow::anyhow!(
                            "decision procedure expects {} but '{}' is another type",
                            type_name::<P>(),
                            actual
                        )
                    })?;
                f(typed).await
            }
        })
    }

    /// Name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts the procedure on `pipeline`.
    pub fn invoke(&self, pipeline: Arc<dyn Pipeline>) -> BoxFuture<'static, anyhow::Result<()>> {
        (self.body)(pipeline)
    }
}

impl fmt::Debug for DecisionFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DecisionFn").field(&self.name).finish()
    }
}
