//! Lifecycle events emitted by the orchestrator.
//!
//! Every event goes through an [`EventHub`], which logs it via `tracing`
//! and forwards it to any registered [`EventSink`]s. Sinks see the typed
//! event, never a formatted line.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::pipeline::PipelineId;

use super::report::PipelineOutcome;

/// Something that happened to a pipeline or to the orchestrator itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// The orchestrator is about to submit its initial pipelines.
    ManagerStarting {
        run_id: Uuid,
        pipelines: usize,
        timestamp: DateTime<Utc>,
    },
    /// A pipeline was constructed and its run routine scheduled.
    PipelineStarted {
        id: PipelineId,
        name: String,
        kind: String,
        parent: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// A pipeline's run routine finished and it left tracking.
    PipelineCompleted {
        id: PipelineId,
        name: String,
        outcome: PipelineOutcome,
        timestamp: DateTime<Utc>,
    },
    /// A pipeline was cancelled after requesting termination.
    PipelineKilled {
        id: PipelineId,
        name: String,
        timestamp: DateTime<Utc>,
    },
    /// A harvested child request could not be turned into a pipeline.
    PipelineRejected {
        name: String,
        parent: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// A decision pass was started.
    DecisionStarted {
        id: PipelineId,
        name: String,
        decision: String,
        timestamp: DateTime<Utc>,
    },
    /// A decision pass finished without error.
    DecisionCompleted {
        id: PipelineId,
        name: String,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A decision pass returned an error or panicked.
    DecisionFailed {
        id: PipelineId,
        name: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// A child request was harvested and queued for submission.
    ChildSubmitted {
        parent: String,
        child: String,
        timestamp: DateTime<Utc>,
    },
    /// Sizes of the tracked collections after a change.
    ActivitySummary {
        active: usize,
        decisions: usize,
        buffered: usize,
        timestamp: DateTime<Utc>,
    },
    /// The loop found nothing left to track.
    ManagerExiting {
        run_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    pub fn manager_starting(run_id: Uuid, pipelines: usize) -> Self {
        LifecycleEvent::ManagerStarting {
            run_id,
            pipelines,
            timestamp: Utc::now(),
        }
    }

    pub fn pipeline_started(
        id: PipelineId,
        name: impl Into<String>,
        kind: impl Into<String>,
        parent: Option<String>,
    ) -> Self {
        LifecycleEvent::PipelineStarted {
            id,
            name: name.into(),
            kind: kind.into(),
            parent,
            timestamp: Utc::now(),
        }
    }

    pub fn pipeline_completed(id: PipelineId, name: impl Into<String>, outcome: PipelineOutcome) -> Self {
        LifecycleEvent::PipelineCompleted {
            id,
            name: name.into(),
            outcome,
            timestamp: Utc::now(),
        }
    }

    pub fn pipeline_killed(id: PipelineId, name: impl Into<String>) -> Self {
        LifecycleEvent::PipelineKilled {
            id,
            name: name.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn pipeline_rejected(
        name: impl Into<String>,
        parent: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        LifecycleEvent::PipelineRejected {
            name: name.into(),
            parent: parent.into(),
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn decision_started(id: PipelineId, name: impl Into<String>, decision: impl Into<String>) -> Self {
        LifecycleEvent::DecisionStarted {
            id,
            name: name.into(),
            decision: decision.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn decision_completed(id: PipelineId, name: impl Into<String>, elapsed: Duration) -> Self {
        LifecycleEvent::DecisionCompleted {
            id,
            name: name.into(),
            elapsed_ms: elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }

    pub fn decision_failed(id: PipelineId, name: impl Into<String>, error: impl Into<String>) -> Self {
        LifecycleEvent::DecisionFailed {
            id,
            name: name.into(),
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn child_submitted(parent: impl Into<String>, child: impl Into<String>) -> Self {
        LifecycleEvent::ChildSubmitted {
            parent: parent.into(),
            child: child.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn activity_summary(active: usize, decisions: usize, buffered: usize) -> Self {
        LifecycleEvent::ActivitySummary {
            active,
            decisions,
            buffered,
            timestamp: Utc::now(),
        }
    }

    pub fn manager_exiting(run_id: Uuid) -> Self {
        LifecycleEvent::ManagerExiting {
            run_id,
            timestamp: Utc::now(),
        }
    }

    /// Snake-case tag of the event, as used in serialized output.
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::ManagerStarting { .. } => "manager_starting",
            LifecycleEvent::PipelineStarted { .. } => "pipeline_started",
            LifecycleEvent::PipelineCompleted { .. } => "pipeline_completed",
            LifecycleEvent::PipelineKilled { .. } => "pipeline_killed",
            LifecycleEvent::PipelineRejected { .. } => "pipeline_rejected",
            LifecycleEvent::DecisionStarted { .. } => "decision_started",
            LifecycleEvent::DecisionCompleted { .. } => "decision_completed",
            LifecycleEvent::DecisionFailed { .. } => "decision_failed",
            LifecycleEvent::ChildSubmitted { .. } => "child_submitted",
            LifecycleEvent::ActivitySummary { .. } => "activity_summary",
            LifecycleEvent::ManagerExiting { .. } => "manager_exiting",
        }
    }

    /// Name of the pipeline the event is about, if any.
    pub fn pipeline_name(&self) -> Option<&str> {
        match self {
            LifecycleEvent::PipelineStarted { name, .. }
            | LifecycleEvent::PipelineCompleted { name, .. }
            | LifecycleEvent::PipelineKilled { name, .. }
            | LifecycleEvent::PipelineRejected { name, .. }
            | LifecycleEvent::DecisionStarted { name, .. }
            | LifecycleEvent::DecisionCompleted { name, .. }
            | LifecycleEvent::DecisionFailed { name, .. } => Some(name),
            LifecycleEvent::ChildSubmitted { child, .. } => Some(child),
            LifecycleEvent::ManagerStarting { .. }
            | LifecycleEvent::ActivitySummary { .. }
            | LifecycleEvent::ManagerExiting { .. } => None,
        }
    }

    /// When the event was created.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            LifecycleEvent::ManagerStarting { timestamp, .. }
            | LifecycleEvent::PipelineStarted { timestamp, .. }
            | LifecycleEvent::PipelineCompleted { timestamp, .. }
            | LifecycleEvent::PipelineKilled { timestamp, .. }
            | LifecycleEvent::PipelineRejected { timestamp, .. }
            | LifecycleEvent::DecisionStarted { timestamp, .. }
            | LifecycleEvent::DecisionCompleted { timestamp, .. }
            | LifecycleEvent::DecisionFailed { timestamp, .. }
            | LifecycleEvent::ChildSubmitted { timestamp, .. }
            | LifecycleEvent::ActivitySummary { timestamp, .. }
            | LifecycleEvent::ManagerExiting { timestamp, .. } => *timestamp,
        }
    }
}

/// Receives lifecycle events in emission order.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &LifecycleEvent);
}

/// Logs every event and fans it out to registered sinks.
#[derive(Clone, Default)]
pub struct EventHub {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn emit(&self, event: LifecycleEvent) {
        log_event(&event);
        for sink in &self.sinks {
            sink.emit(&event);
        }
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

fn log_event(event: &LifecycleEvent) {
    match event {
        LifecycleEvent::ManagerStarting { run_id, pipelines, .. } => {
            info!(run_id = %run_id, pipelines = pipelines, "Orchestrator starting");
        }
        LifecycleEvent::PipelineStarted { id, name, kind, parent, .. } => {
            info!(
                id = %id,
                pipeline = %name,
                kind = %kind,
                parent = parent.as_deref().unwrap_or("-"),
                "Pipeline started"
            );
        }
        LifecycleEvent::PipelineCompleted { id, name, outcome, .. } => match outcome {
            PipelineOutcome::Succeeded => {
                info!(id = %id, pipeline = %name, "Pipeline completed");
            }
            other => {
                warn!(id = %id, pipeline = %name, outcome = %other, "Pipeline completed with error");
            }
        },
        LifecycleEvent::PipelineKilled { id, name, .. } => {
            info!(id = %id, pipeline = %name, "Pipeline killed");
        }
        LifecycleEvent::PipelineRejected { name, parent, error, .. } => {
            error!(pipeline = %name, parent = %parent, error = %error, "Child pipeline rejected");
        }
        LifecycleEvent::DecisionStarted { id, name, decision, .. } => {
            debug!(id = %id, pipeline = %name, decision = %decision, "Decision pass started");
        }
        LifecycleEvent::DecisionCompleted { id, name, elapsed_ms, .. } => {
            debug!(id = %id, pipeline = %name, elapsed_ms = elapsed_ms, "Decision pass completed");
        }
        LifecycleEvent::DecisionFailed { id, name, error, .. } => {
            warn!(id = %id, pipeline = %name, error = %error, "Decision pass failed");
        }
        LifecycleEvent::ChildSubmitted { parent, child, .. } => {
            info!(parent = %parent, child = %child, "Child pipeline requested");
        }
        LifecycleEvent::ActivitySummary { active, decisions, buffered, .. } => {
            debug!(
                active = active,
                decisions = decisions,
                buffered = buffered,
                "Orchestrator activity"
            );
        }
        LifecycleEvent::ManagerExiting { run_id, .. } => {
            info!(run_id = %run_id, "Orchestrator exiting");
        }
    }
}

/// Keeps every event in memory; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the events recorded so far.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().expect("lock not poisoned").clone()
    }

    /// Recorded events with the given kind tag.
    pub fn of_kind(&self, kind: &str) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .expect("lock not poisoned")
            .iter()
            .filter(|e| e.kind() == kind)
            .cloned()
            .collect()
    }

    /// Kind tags of the recorded events for one pipeline, in order.
    pub fn kinds_for(&self, pipeline: &str) -> Vec<&'static str> {
        self.events
            .lock()
            .expect("lock not poisoned")
            .iter()
            .filter(|e| e.pipeline_name() == Some(pipeline))
            .map(LifecycleEvent::kind)
            .collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &LifecycleEvent) {
        self.events
            .lock()
            .expect("lock not poisoned")
            .push(event.clone());
    }
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl ChannelSink {
    /// Creates a sink and the receiver its events arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &LifecycleEvent) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.tx.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_and_name() {
        let event = LifecycleEvent::pipeline_started(PipelineId(3), "p3", "noop", None);
        assert_eq!(event.kind(), "pipeline_started");
        assert_eq!(event.pipeline_name(), Some("p3"));

        let event = LifecycleEvent::activity_summary(1, 0, 2);
        assert_eq!(event.pipeline_name(), None);
        assert!(event.timestamp() <= Utc::now());
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = LifecycleEvent::decision_failed(PipelineId(1), "p1", "boom");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "decision_failed");
        assert_eq!(json["error"], "boom");
        assert_eq!(json["id"], 1);
    }

    #[test]
    fn test_hub_fans_out_to_sinks() {
        let memory = MemorySink::new();
        let (channel, mut rx) = ChannelSink::new();

        let mut hub = EventHub::new();
        hub.add_sink(Arc::new(memory.clone()));
        hub.add_sink(Arc::new(channel));
        assert_eq!(hub.sink_count(), 2);

        hub.emit(LifecycleEvent::pipeline_killed(PipelineId(1), "p1"));
        hub.emit(LifecycleEvent::child_submitted("p1", "p1_g2"));

        assert_eq!(memory.events().len(), 2);
        assert_eq!(memory.kinds_for("p1"), vec!["pipeline_killed"]);
        assert_eq!(memory.of_kind("child_submitted").len(), 1);

        assert_eq!(rx.try_recv().unwrap().kind(), "pipeline_killed");
        assert_eq!(rx.try_recv().unwrap().kind(), "child_submitted");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_sink_tolerates_closed_receiver() {
        let (channel, rx) = ChannelSink::new();
        drop(rx);
        channel.emit(&LifecycleEvent::manager_exiting(Uuid::new_v4()));
    }
}
