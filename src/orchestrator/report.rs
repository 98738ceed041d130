//! Run report assembled by the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::PipelineId;

/// How a pipeline left the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum PipelineOutcome {
    /// Run routine returned `Ok`.
    Succeeded,
    /// Run routine returned an error.
    Failed(String),
    /// Run routine panicked.
    Panicked(String),
    /// Cancelled after requesting termination.
    Killed,
}

impl PipelineOutcome {
    /// True for outcomes where the run routine returned on its own.
    pub fn is_completion(&self) -> bool {
        !matches!(self, PipelineOutcome::Killed)
    }
}

impl std::fmt::Display for PipelineOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineOutcome::Succeeded => write!(f, "succeeded"),
            PipelineOutcome::Failed(e) => write!(f, "failed: {}", e),
            PipelineOutcome::Panicked(e) => write!(f, "panicked: {}", e),
            PipelineOutcome::Killed => write!(f, "killed"),
        }
    }
}

/// Lifecycle record of one pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRecord {
    pub id: PipelineId,
    pub name: String,
    pub kind: String,
    /// Name of the pipeline that requested this one.
    pub parent: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// `None` while the pipeline is still tracked.
    pub outcome: Option<PipelineOutcome>,
    pub decision_passes: u32,
}

/// Summary of one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignReport {
    /// Unique identifier of this run.
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Pipelines constructed and scheduled.
    pub pipelines_started: u64,
    /// Pipelines whose run routine returned, successfully or not.
    pub pipelines_completed: u64,
    /// Completed pipelines whose run routine failed or panicked.
    pub pipelines_failed: u64,
    /// Pipelines cancelled after requesting termination.
    pub pipelines_killed: u64,
    /// Child requests whose pipeline could not be constructed.
    pub pipelines_rejected: u64,
    pub decision_passes_started: u64,
    pub decision_passes_failed: u64,
    /// Child pipelines successfully started.
    pub children_spawned: u64,
    /// One record per started pipeline, in start order.
    pub pipelines: Vec<PipelineRecord>,
}

impl CampaignReport {
    /// Creates an empty report for a new run.
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            pipelines_started: 0,
            pipelines_completed: 0,
            pipelines_failed: 0,
            pipelines_killed: 0,
            pipelines_rejected: 0,
            decision_passes_started: 0,
            decision_passes_failed: 0,
            children_spawned: 0,
            pipelines: Vec::new(),
        }
    }

    pub(crate) fn record_started(
        &mut self,
        id: PipelineId,
        name: &str,
        kind: &str,
        parent: Option<&str>,
    ) {
        self.pipelines_started += 1;
        if parent.is_some() {
            self.children_spawned += 1;
        }
        self.pipelines.push(PipelineRecord {
            id,
            name: name.to_string(),
            kind: kind.to_string(),
            parent: parent.map(str::to_string),
            started_at: Utc::now(),
            finished_at: None,
            outcome: None,
            decision_passes: 0,
        });
    }

    pub(crate) fn record_finished(&mut self, id: PipelineId, outcome: PipelineOutcome) {
        match &outcome {
            PipelineOutcome::Succeeded => self.pipelines_completed += 1,
            PipelineOutcome::Failed(_) | PipelineOutcome::Panicked(_) => {
                self.pipelines_completed += 1;
                self.pipelines_failed += 1;
            }
            PipelineOutcome::Killed => self.pipelines_killed += 1,
        }
        if let Some(record) = self.record_mut(id) {
            record.finished_at = Some(Utc::now());
            record.outcome = Some(outcome);
        }
    }

    pub(crate) fn record_decision_started(&mut self, id: PipelineId) {
        self.decision_passes_started += 1;
        if let Some(record) = self.record_mut(id) {
            record.decision_passes += 1;
        }
    }

    pub(crate) fn record_decision_failed(&mut self) {
        self.decision_passes_failed += 1;
    }

    pub(crate) fn record_rejected(&mut self) {
        self.pipelines_rejected += 1;
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Looks up the record of a pipeline by name.
    ///
    /// Returns the most recently started pipeline if a name was reused.
    pub fn pipeline(&self, name: &str) -> Option<&PipelineRecord> {
        self.pipelines.iter().rev().find(|r| r.name == name)
    }

    /// Wall-clock duration of the run, if finished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }

    /// True if every started pipeline has an outcome.
    pub fn all_finished(&self) -> bool {
        self.pipelines.iter().all(|r| r.outcome.is_some())
    }

    fn record_mut(&mut self, id: PipelineId) -> Option<&mut PipelineRecord> {
        self.pipelines.iter_mut().rev().find(|r| r.id == id)
    }
}
