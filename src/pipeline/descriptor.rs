//! Pipeline descriptors: the declarative recipe for one pipeline instance.

use serde_json::Value;

use crate::error::ValidationError;

use super::contract::{BuildPipeline, PipelineKind};
use super::decision::DecisionFn;
use super::ParamMap;

/// Parameter keys the orchestrator passes itself and callers may not set.
const RESERVED_KEYS: &[&str] = &["name"];

/// Describes how to instantiate one pipeline.
#[derive(Clone)]
pub struct PipelineDescriptor {
    name: String,
    kind: PipelineKind,
    init_params: ParamMap,
    decision: Option<DecisionFn>,
    extra_args: ParamMap,
}

impl PipelineDescriptor {
    /// Creates a descriptor for a pipeline of the given kind.
    pub fn new(name: impl Into<String>, kind: PipelineKind) -> Self {
        Self {
            name: name.into(),
            kind,
            init_params: ParamMap::new(),
            decision: None,
            extra_args: ParamMap::new(),
        }
    }

    /// Creates a descriptor for a pipeline type that builds itself.
    pub fn of<P: BuildPipeline>(name: impl Into<String>) -> Self {
        Self::new(name, PipelineKind::of::<P>())
    }

    /// Replaces the initialization parameters.
    pub fn with_config(mut self, params: ParamMap) -> Self {
        self.init_params = params;
        self
    }

    /// Sets one initialization parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.init_params.insert(key.into(), value.into());
        self
    }

    /// Attaches a decision procedure.
    pub fn with_decision(mut self, decision: DecisionFn) -> Self {
        self.decision = Some(decision);
        self
    }

    /// Attaches an optional decision procedure.
    pub fn with_optional_decision(mut self, decision: Option<DecisionFn>) -> Self {
        self.decision = decision;
        self
    }

    /// Replaces the extra constructor arguments.
    pub fn with_extra_args(mut self, args: ParamMap) -> Self {
        self.extra_args = args;
        self
    }

    /// Sets one extra constructor argument.
    pub fn with_extra_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra_args.insert(key.into(), value.into());
        self
    }

    /// Checks the descriptor without side effects.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for an empty or whitespace-padded name, an
    /// unnamed implementation kind, or a reserved parameter key.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName);
        }

        if self.name.trim() != self.name {
            return Err(ValidationError::UntrimmedName(self.name));
        }

        if self.kind.name().is_empty() {
            return Err(ValidationError::MissingKind(self.name));
        }

        for key in self.init_params.keys().chain(self.extra_args.keys()) {
            if RESERVED_KEYS.contains(&key.as_str()) {
                return Err(ValidationError::ReservedParameter {
                    pipeline: self.name.clone(),
                    key: key.clone(),
                });
            }
        }

        Ok(self)
    }

    /// Returns the name and the merged constructor parameters.
    ///
    /// Extra arguments win over initialization parameters on key conflicts.
    pub fn to_constructor_args(&self) -> (String, ParamMap) {
        let mut merged = self.init_params.clone();
        for (key, value) in &self.extra_args {
            merged.insert(key.clone(), value.clone());
        }
        (self.name.clone(), merged)
    }

    /// Pipeline name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Implementation kind.
    pub fn kind(&self) -> &PipelineKind {
        &self.kind
    }

    /// Initialization parameters.
    pub fn init_params(&self) -> &ParamMap {
        &self.init_params
    }

    /// Extra constructor arguments.
    pub fn extra_args(&self) -> &ParamMap {
        &self.extra_args
    }

    /// Decision procedure, if any.
    pub fn decision(&self) -> Option<&DecisionFn> {
        self.decision.as_ref()
    }
}

impl std::fmt::Debug for PipelineDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind.name())
            .field("init_params", &self.init_params)
            .field("decision", &self.decision.as_ref().map(DecisionFn::name))
            .field("extra_args", &self.extra_args)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::NoopPipeline;
    use serde_json::json;

    #[test]
    fn test_validate_accepts_plain_descriptor() {
        let descriptor = PipelineDescriptor::of::<NoopPipeline>("p1")
            .with_param("generation", 1)
            .validate()
            .expect("valid descriptor");
        assert_eq!(descriptor.name(), "p1");
        assert_eq!(descriptor.kind().name(), "noop");
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let err = PipelineDescriptor::of::<NoopPipeline>("")
            .validate()
            .unwrap_err();
        assert_eq!(err, ValidationError::EmptyName);
    }

    #[test]
    fn test_validate_rejects_padded_name() {
        let err = PipelineDescriptor::of::<NoopPipeline>(" p1")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ValidationError::UntrimmedName(_)));
    }

    #[test]
    fn test_validate_rejects_reserved_key() {
        let err = PipelineDescriptor::of::<NoopPipeline>("p1")
            .with_extra_arg("name", "other")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ValidationError::ReservedParameter { ref key, .. } if key == "name"));
    }

    #[test]
    fn test_constructor_args_extra_wins() {
        let descriptor = PipelineDescriptor::of::<NoopPipeline>("p1")
            .with_param("depth", 1)
            .with_param("mode", "fast")
            .with_extra_arg("depth", 5);

        let (name, merged) = descriptor.to_constructor_args();
        assert_eq!(name, "p1");
        assert_eq!(merged.get("depth"), Some(&json!(5)));
        assert_eq!(merged.get("mode"), Some(&json!("fast")));
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_constructor_args_is_deterministic() {
        let descriptor = PipelineDescriptor::of::<NoopPipeline>("p1")
            .with_param("a", 1)
            .with_extra_arg("b", 2);
        assert_eq!(descriptor.to_constructor_args(), descriptor.to_constructor_args());
    }

    #[test]
    fn test_debug_shows_decision_name() {
        let descriptor = PipelineDescriptor::of::<NoopPipeline>("p1")
            .with_decision(DecisionFn::new("skip", |_| async { Ok(()) }));
        let rendered = format!("{:?}", descriptor);
        assert!(rendered.contains("skip"));
        assert!(rendered.contains("noop"));
    }
}
