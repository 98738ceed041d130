//! Name-based registry of pipeline kinds and decision procedures.
//!
//! Campaign files refer to implementations and decision procedures by
//! name; the registry resolves those names into typed factories, so a
//! descriptor can only ever reference a type that satisfies the contract.

use std::collections::BTreeMap;

use crate::error::ValidationError;

use super::contract::{BuildPipeline, PipelineKind};
use super::decision::DecisionFn;

/// Registered pipeline kinds and decision procedures.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    kinds: BTreeMap<String, PipelineKind>,
    decisions: BTreeMap<String, DecisionFn>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a self-building pipeline type under its `KIND` name.
    pub fn register_pipeline<P: BuildPipeline>(&mut self) -> &mut Self {
        self.register_kind(PipelineKind::of::<P>())
    }

    /// Registers a pipeline kind, replacing any kind with the same name.
    pub fn register_kind(&mut self, kind: PipelineKind) -> &mut Self {
        self.kinds.insert(kind.name().to_string(), kind);
        self
    }

    /// Registers a decision procedure under its own name.
    pub fn register_decision(&mut self, decision: DecisionFn) -> &mut Self {
        self.decisions.insert(decision.name().to_string(), decision);
        self
    }

    /// Looks up a pipeline kind.
    pub fn kind(&self, name: &str) -> Result<PipelineKind, ValidationError> {
        self.kinds
            .get(name)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownPipelineType(name.to_string()))
    }

    /// Looks up a decision procedure.
    pub fn decision(&self, name: &str) -> Result<DecisionFn, ValidationError> {
        self.decisions
            .get(name)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownDecision(name.to_string()))
    }

    /// Registered pipeline kind names, sorted.
    pub fn kind_names(&self) -> Vec<&str> {
        self.kinds.keys().map(String::as_str).collect()
    }

    /// Registered decision procedure names, sorted.
    pub fn decision_names(&self) -> Vec<&str> {
        self.decisions.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{NoopPipeline, OtherPipeline};

    #[test]
    fn test_lookup_registered_kind() {
        let mut registry = Registry::new();
        registry
            .register_pipeline::<NoopPipeline>()
            .register_pipeline::<OtherPipeline>();

        assert_eq!(registry.kind("noop").expect("registered").name(), "noop");
        assert_eq!(registry.kind_names(), vec!["noop", "other"]);
    }

    #[test]
    fn test_unknown_kind_is_validation_error() {
        let registry = Registry::new();
        let err = registry.kind("folding").unwrap_err();
        assert_eq!(err, ValidationError::UnknownPipelineType("folding".to_string()));
    }

    #[test]
    fn test_decision_lookup() {
        let mut registry = Registry::new();
        registry.register_decision(DecisionFn::new("skip", |_| async { Ok(()) }));

        assert_eq!(registry.decision("skip").expect("registered").name(), "skip");
        assert!(matches!(
            registry.decision("branch"),
            Err(ValidationError::UnknownDecision(_))
        ));
        assert_eq!(registry.decision_names(), vec!["skip"]);
    }
}
