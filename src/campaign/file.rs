//! Campaign files.
//!
//! A campaign lists the initial pipelines of a run, in YAML or JSON:
//!
//! ```yaml
//! name: binders
//! pipelines:
//!   - name: p1
//!     type: generational
//!     config:
//!       max_generations: 4
//!     adaptive_fn: random_branching
//!     kwargs:
//!       generation: 1
//!   - name: p2
//!     type: generational
//!     max_generations: 2     # unknown keys become extra arguments
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CampaignError;
use crate::pipeline::{ParamMap, PipelineDescriptor, Registry};

/// One pipeline entry of a campaign file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEntry {
    pub name: String,
    /// Registered pipeline kind.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: ParamMap,
    /// Registered decision procedure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adaptive_fn: Option<String>,
    /// Extra constructor arguments.
    #[serde(default)]
    pub kwargs: ParamMap,
    /// Any other key; treated as an extra argument, below `kwargs`.
    #[serde(flatten)]
    pub extra: ParamMap,
}

impl PipelineEntry {
    /// Resolves names against `registry` and builds a validated descriptor.
    ///
    /// # Errors
    ///
    /// Returns `CampaignError::Validation` for unknown kinds or decision
    /// procedures and for descriptors that fail validation.
    pub fn resolve(&self, registry: &Registry) -> Result<PipelineDescriptor, CampaignError> {
        let kind = registry.kind(&self.kind)?;
        let decision = self
            .adaptive_fn
            .as_deref()
            .map(|name| registry.decision(name))
            .transpose()?;

        let mut extra_args = self.extra.clone();
        for (key, value) in &self.kwargs {
            extra_args.insert(key.clone(), value.clone());
        }

        let descriptor = PipelineDescriptor::new(&self.name, kind)
            .with_config(self.config.clone())
            .with_optional_decision(decision)
            .with_extra_args(extra_args)
            .validate()?;
        Ok(descriptor)
    }
}

/// A campaign: the initial pipelines of one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub pipelines: Vec<PipelineEntry>,
}

impl CampaignFile {
    /// Loads a campaign, choosing the format by file extension.
    ///
    /// # Errors
    ///
    /// Returns `CampaignError` if the file cannot be read or parsed, has an
    /// unsupported extension, or lists no pipelines.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CampaignError> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        let content = std::fs::read_to_string(path)?;
        match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml_str(&content),
            "json" => Self::from_json_str(&content),
            other => Err(CampaignError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Parses a YAML campaign.
    pub fn from_yaml_str(content: &str) -> Result<Self, CampaignError> {
        let campaign: Self = serde_yaml::from_str(content)?;
        campaign.check_not_empty()
    }

    /// Parses a JSON campaign.
    pub fn from_json_str(content: &str) -> Result<Self, CampaignError> {
        let campaign: Self = serde_json::from_str(content)?;
        campaign.check_not_empty()
    }

    /// Resolves every entry into a descriptor, in file order.
    ///
    /// # Errors
    ///
    /// Returns the first entry's resolution error.
    pub fn resolve(&self, registry: &Registry) -> Result<Vec<PipelineDescriptor>, CampaignError> {
        let mut seen = HashSet::new();
        for entry in &self.pipelines {
            if !seen.insert(entry.name.as_str()) {
                warn!(pipeline = %entry.name, "Pipeline name appears more than once");
            }
        }

        self.pipelines
            .iter()
            .map(|entry| entry.resolve(registry))
            .collect()
    }

    /// Campaign name, or `fallback` when the file does not set one.
    pub fn display_name<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(fallback)
    }

    fn check_not_empty(self) -> Result<Self, CampaignError> {
        if self.pipelines.is_empty() {
            return Err(CampaignError::Empty);
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use serde_json::json;
    use std::io::Write;

    const YAML: &str = r#"
name: demo
pipelines:
  - name: p1
    type: generational
    config:
      max_generations: 4
      generation: 1
    adaptive_fn: random_branching
    kwargs:
      generation: 2
    parent_name: seed
    generation: 5
  - name: s1
    type: score_split
"#;

    #[test]
    fn test_yaml_resolves_with_override_order() {
        let campaign = CampaignFile::from_yaml_str(YAML).expect("valid yaml");
        assert_eq!(campaign.display_name("fallback"), "demo");

        let descriptors = campaign
            .resolve(&Registry::with_builtins())
            .expect("resolves");
        assert_eq!(descriptors.len(), 2);

        let (name, args) = descriptors[0].to_constructor_args();
        assert_eq!(name, "p1");
        assert_eq!(args.get("max_generations"), Some(&json!(4)));
        // kwargs beat other extra keys, which beat config
        assert_eq!(args.get("generation"), Some(&json!(2)));
        assert_eq!(args.get("parent_name"), Some(&json!("seed")));
        assert_eq!(
            descriptors[0].decision().map(|d| d.name()),
            Some("random_branching")
        );
        assert!(descriptors[1].decision().is_none());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let campaign = CampaignFile::from_json_str(
            r#"{"pipelines": [{"name": "p1", "type": "folding"}]}"#,
        )
        .unwrap();
        let err = campaign.resolve(&Registry::with_builtins()).unwrap_err();
        assert!(matches!(
            err,
            CampaignError::Validation(ValidationError::UnknownPipelineType(ref t)) if t == "folding"
        ));
    }

    #[test]
    fn test_unknown_decision_is_rejected() {
        let campaign = CampaignFile::from_json_str(
            r#"{"pipelines": [{"name": "p1", "type": "generational", "adaptive_fn": "coin"}]}"#,
        )
        .unwrap();
        let err = campaign.resolve(&Registry::with_builtins()).unwrap_err();
        assert!(matches!(
            err,
            CampaignError::Validation(ValidationError::UnknownDecision(_))
        ));
    }

    #[test]
    fn test_reserved_key_is_rejected() {
        let campaign = CampaignFile::from_json_str(
            r#"{"pipelines": [{"name": "p1", "type": "generational", "kwargs": {"name": "other"}}]}"#,
        )
        .unwrap();
        let err = campaign.resolve(&Registry::with_builtins()).unwrap_err();
        assert!(matches!(
            err,
            CampaignError::Validation(ValidationError::ReservedParameter { .. })
        ));
    }

    #[test]
    fn test_empty_campaign() {
        let err = CampaignFile::from_yaml_str("pipelines: []").unwrap_err();
        assert!(matches!(err, CampaignError::Empty));
    }

    #[test]
    fn test_from_path_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let yaml_path = dir.path().join("campaign.yml");
        std::fs::write(&yaml_path, YAML).unwrap();
        assert_eq!(CampaignFile::from_path(&yaml_path).unwrap().pipelines.len(), 2);

        let json_path = dir.path().join("campaign.json");
        let mut file = std::fs::File::create(&json_path).unwrap();
        write!(file, r#"{{"pipelines": [{{"name": "p1", "type": "generational"}}]}}"#).unwrap();
        assert_eq!(CampaignFile::from_path(&json_path).unwrap().pipelines.len(), 1);

        let toml_path = dir.path().join("campaign.toml");
        std::fs::write(&toml_path, "pipelines = []").unwrap();
        assert!(matches!(
            CampaignFile::from_path(&toml_path),
            Err(CampaignError::UnsupportedFormat(ref ext)) if ext == "toml"
        ));

        assert!(matches!(
            CampaignFile::from_path(dir.path().join("missing.yaml")),
            Err(CampaignError::Io(_))
        ));
    }
}
