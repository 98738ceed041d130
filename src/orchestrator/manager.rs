//! The orchestrator: owns pipeline lifecycles and runs the scheduling loop.
//!
//! Each loop iteration works through the tracked state in a fixed order:
//!
//! 1. start a decision pass for every pipeline that requested one and has
//!    none outstanding
//! 2. harvest pending child requests into the spawn buffer
//! 3. cancel pipelines that requested termination
//! 4. remove pipelines whose run routine finished, unless a decision pass
//!    for them is still running
//! 5. drop finished decision passes
//! 6. submit the spawn buffer
//! 7. exit once nothing is active, deciding or buffered
//! 8. otherwise, if nothing changed, wait for a wake-up signal or the poll
//!    interval, whichever comes first
//!
//! Pipelines and finished tasks wake the loop through a shared [`Notify`],
//! so the poll interval only bounds how long an idle loop sleeps.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, PipelineError};
use crate::execution::{ExecutionBackend, ExecutionHandle};
use crate::pipeline::control::DecisionGuard;
use crate::pipeline::{
    Pipeline, PipelineContext, PipelineControl, PipelineDescriptor, PipelineId,
};

use super::config::OrchestratorConfig;
use super::events::{EventHub, EventSink, LifecycleEvent};
use super::report::{CampaignReport, PipelineOutcome};

/// A pipeline whose run routine has been scheduled.
struct ActivePipeline {
    pipeline: Arc<dyn Pipeline>,
    task: JoinHandle<anyhow::Result<()>>,
}

/// An outstanding decision pass.
///
/// Keeps its own handle on the control block so a child request left
/// behind by the pass can be harvested after the pipeline is gone.
struct DecisionTask {
    name: String,
    control: Arc<PipelineControl>,
    task: JoinHandle<bool>,
}

/// A harvested child request waiting for submission.
struct SpawnRequest {
    parent: String,
    descriptor: PipelineDescriptor,
}

/// Notifies the loop when a task ends, however it ends.
struct WakeOnDrop(Arc<Notify>);

impl Drop for WakeOnDrop {
    fn drop(&mut self) {
        self.0.notify_one();
    }
}

/// Runs a campaign of dynamically branching pipelines.
pub struct Orchestrator {
    config: OrchestratorConfig,
    engine: ExecutionHandle,
    events: EventHub,
    wake: Arc<Notify>,
    next_id: u64,
    active: BTreeMap<PipelineId, ActivePipeline>,
    decisions: BTreeMap<PipelineId, DecisionTask>,
    spawn_buffer: Vec<SpawnRequest>,
    report: CampaignReport,
}

impl Orchestrator {
    /// Creates an orchestrator and the execution handle its pipelines share.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError` if the configuration is invalid or the
    /// backend fails to initialize.
    pub async fn create(
        backend: Arc<dyn ExecutionBackend>,
        config: OrchestratorConfig,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let engine = ExecutionHandle::create(backend).await?;

        Ok(Self {
            config,
            engine,
            events: EventHub::new(),
            wake: Arc::new(Notify::new()),
            next_id: 0,
            active: BTreeMap::new(),
            decisions: BTreeMap::new(),
            spawn_buffer: Vec::new(),
            report: CampaignReport::new(Uuid::new_v4()),
        })
    }

    /// Builder method to add an event sink.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events.add_sink(sink);
        self
    }

    /// Adds an event sink.
    pub fn add_event_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.events.add_sink(sink);
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn engine(&self) -> &ExecutionHandle {
        &self.engine
    }

    pub fn run_id(&self) -> Uuid {
        self.report.run_id
    }

    /// Report of everything recorded so far.
    pub fn report(&self) -> &CampaignReport {
        &self.report
    }

    /// Number of pipelines whose run routine is tracked.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Number of outstanding decision passes.
    pub fn decision_count(&self) -> usize {
        self.decisions.len()
    }

    /// Number of harvested child requests not yet submitted.
    pub fn buffered_count(&self) -> usize {
        self.spawn_buffer.len()
    }

    /// True when nothing is tracked.
    pub fn is_idle(&self) -> bool {
        self.active.is_empty() && self.decisions.is_empty() && self.spawn_buffer.is_empty()
    }

    /// Constructs every descriptor and schedules their run routines.
    ///
    /// The batch is all-or-nothing: every descriptor is validated and
    /// constructed before any run routine is scheduled.
    ///
    /// # Errors
    ///
    /// Returns the first validation or construction failure; nothing from
    /// the batch is scheduled in that case.
    pub fn submit_pipelines(
        &mut self,
        descriptors: Vec<PipelineDescriptor>,
    ) -> Result<Vec<PipelineId>, OrchestratorError> {
        let mut built = Vec::with_capacity(descriptors.len());
        for (offset, descriptor) in descriptors.into_iter().enumerate() {
            let descriptor = descriptor.validate()?;
            let id = PipelineId(self.next_id + offset as u64 + 1);
            let pipeline = self.construct(id, &descriptor, None).map_err(|source| {
                OrchestratorError::Construction {
                    name: descriptor.name().to_string(),
                    source,
                }
            })?;
            built.push(pipeline);
        }

        let mut ids = Vec::with_capacity(built.len());
        for pipeline in built {
            self.next_id += 1;
            ids.push(self.launch(pipeline));
        }
        Ok(ids)
    }

    /// Submits the initial pipelines and runs the loop until nothing is left.
    ///
    /// # Errors
    ///
    /// Only initial submission can fail; failures inside pipelines and
    /// decision procedures are logged and recorded in the report.
    pub async fn run(
        &mut self,
        initial: Vec<PipelineDescriptor>,
    ) -> Result<CampaignReport, OrchestratorError> {
        self.events
            .emit(LifecycleEvent::manager_starting(self.report.run_id, initial.len()));
        self.submit_pipelines(initial)?;

        loop {
            let mut changed = self.start_decision_passes() > 0;
            changed |= self.harvest_child_requests() > 0;
            changed |= self.kill_terminated() > 0;
            changed |= self.reap_finished_pipelines().await > 0;
            changed |= self.reap_finished_decisions().await > 0;
            changed |= self.submit_spawn_buffer() > 0;

            if changed && self.config.activity_summaries {
                self.events.emit(LifecycleEvent::activity_summary(
                    self.active.len(),
                    self.decisions.len(),
                    self.spawn_buffer.len(),
                ));
            }

            if self.is_idle() {
                break;
            }

            if !changed {
                // Timing out is the polling fallback, not an error.
                let _ = tokio::time::timeout(self.config.poll_interval, self.wake.notified()).await;
            }
        }

        self.report.finish();
        self.events
            .emit(LifecycleEvent::manager_exiting(self.report.run_id));
        Ok(self.report.clone())
    }

    /// Shuts the shared execution handle down.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::Backend` if the backend fails to shut down.
    pub async fn shutdown(self) -> Result<(), OrchestratorError> {
        self.engine.shutdown().await?;
        Ok(())
    }

    fn construct(
        &self,
        id: PipelineId,
        descriptor: &PipelineDescriptor,
        parent: Option<&str>,
    ) -> Result<Arc<dyn Pipeline>, PipelineError> {
        let control = Arc::new(PipelineControl::new(Arc::clone(&self.wake)));
        let ctx = PipelineContext::new(
            id,
            descriptor,
            parent.map(str::to_string),
            control,
            self.engine.clone(),
        );
        descriptor.kind().construct(ctx)
    }

    fn launch(&mut self, pipeline: Arc<dyn Pipeline>) -> PipelineId {
        let ctx = pipeline.context();
        let id = ctx.id();
        self.report
            .record_started(id, ctx.name(), ctx.kind().name(), ctx.parent());
        self.events.emit(LifecycleEvent::pipeline_started(
            id,
            ctx.name(),
            ctx.kind().name(),
            ctx.parent().map(str::to_string),
        ));

        let runner = Arc::clone(&pipeline);
        let wake = WakeOnDrop(Arc::clone(&self.wake));
        let task = tokio::spawn(async move {
            let _wake = wake;
            runner.run().await
        });

        self.active.insert(id, ActivePipeline { pipeline, task });
        id
    }

    /// Step 1.
    fn start_decision_passes(&mut self) -> usize {
        let requested: Vec<Arc<dyn Pipeline>> = self
            .active
            .iter()
            .filter(|(id, entry)| {
                entry.pipeline.context().control().decision_requested()
                    && !self.decisions.contains_key(*id)
            })
            .map(|(_, entry)| Arc::clone(&entry.pipeline))
            .collect();

        let mut started = 0;
        for pipeline in requested {
            let ctx = pipeline.context();
            let id = ctx.id();
            let name = ctx.name().to_string();
            let control = Arc::clone(ctx.control());

            let Some(decision) = ctx.decision().cloned() else {
                debug!(pipeline = %name, "No decision procedure; releasing barrier");
                control.finish_decision();
                continue;
            };

            self.report.record_decision_started(id);
            self.events
                .emit(LifecycleEvent::decision_started(id, &name, decision.name()));

            let events = self.events.clone();
            let wake = WakeOnDrop(Arc::clone(&self.wake));
            let guard = DecisionGuard::new(Arc::clone(&control));
            let pass_name = name.clone();
            let task = tokio::spawn(async move {
                let _wake = wake;
                let _guard = guard;
                let started = Instant::now();
                let outcome = AssertUnwindSafe(decision.invoke(pipeline))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => {
                        events.emit(LifecycleEvent::decision_completed(
                            id,
                            &pass_name,
                            started.elapsed(),
                        ));
                        false
                    }
                    Ok(Err(e)) => {
                        events.emit(LifecycleEvent::decision_failed(id, &pass_name, format!("{:#}", e)));
                        true
                    }
                    Err(payload) => {
                        let message = format!("panicked: {}", panic_message(payload.as_ref()));
                        events.emit(LifecycleEvent::decision_failed(id, &pass_name, message));
                        true
                    }
                }
            });

            self.decisions
                .insert(id, DecisionTask { name, control, task });
            started += 1;
        }
        started
    }

    /// Step 2.
    fn harvest_child_requests(&mut self) -> usize {
        let mut harvested = 0;
        for entry in self.active.values() {
            let ctx = entry.pipeline.context();
            if let Some(descriptor) = ctx.control().take_child_request() {
                self.events
                    .emit(LifecycleEvent::child_submitted(ctx.name(), descriptor.name()));
                self.spawn_buffer.push(SpawnRequest {
                    parent: ctx.name().to_string(),
                    descriptor,
                });
                harvested += 1;
            }
        }
        harvested
    }

    /// Step 3. Does not wait for an outstanding decision pass.
    fn kill_terminated(&mut self) -> usize {
        let doomed: Vec<PipelineId> = self
            .active
            .iter()
            .filter(|(_, entry)| entry.pipeline.context().termination_requested())
            .map(|(id, _)| *id)
            .collect();

        for id in &doomed {
            if let Some(entry) = self.active.remove(id) {
                entry.task.abort();
                let ctx = entry.pipeline.context();
                self.buffer_leftover_child(ctx.name(), ctx.control());
                self.report.record_finished(*id, PipelineOutcome::Killed);
                self.events
                    .emit(LifecycleEvent::pipeline_killed(*id, ctx.name()));
            }
        }
        doomed.len()
    }

    /// Step 4.
    async fn reap_finished_pipelines(&mut self) -> usize {
        let finished: Vec<PipelineId> = self
            .active
            .iter()
            .filter(|(_, entry)| entry.task.is_finished())
            .map(|(id, _)| *id)
            .collect();

        let mut removed = 0;
        for id in finished {
            if let Some(pass) = self.decisions.get(&id) {
                if !pass.task.is_finished() {
                    debug!(pipeline = %pass.name, "Run finished; waiting for decision pass");
                    continue;
                }
            }

            if let Some(pass) = self.decisions.remove(&id) {
                self.settle_decision(pass).await;
            }

            let Some(entry) = self.active.remove(&id) else {
                continue;
            };
            let outcome = run_outcome(entry.task.await);
            let ctx = entry.pipeline.context();
            self.buffer_leftover_child(ctx.name(), ctx.control());
            self.report.record_finished(id, outcome.clone());
            self.events
                .emit(LifecycleEvent::pipeline_completed(id, ctx.name(), outcome));
            removed += 1;
        }
        removed
    }

    /// Step 5.
    async fn reap_finished_decisions(&mut self) -> usize {
        let finished: Vec<PipelineId> = self
            .decisions
            .iter()
            .filter(|(_, pass)| pass.task.is_finished())
            .map(|(id, _)| *id)
            .collect();

        for id in &finished {
            if let Some(pass) = self.decisions.remove(id) {
                if !self.active.contains_key(id) {
                    // The pipeline was killed while this pass was running.
                    self.buffer_leftover_child(&pass.name, &pass.control);
                }
                self.settle_decision(pass).await;
            }
        }
        finished.len()
    }

    /// Step 6. Child construction failures are recorded, not returned.
    fn submit_spawn_buffer(&mut self) -> usize {
        let requests = std::mem::take(&mut self.spawn_buffer);
        let submitted = requests.len();

        for SpawnRequest { parent, descriptor } in requests {
            let name = descriptor.name().to_string();
            let id = PipelineId(self.next_id + 1);
            let built = descriptor
                .validate()
                .map_err(|e| e.to_string())
                .and_then(|d| {
                    self.construct(id, &d, Some(parent.as_str()))
                        .map_err(|e| e.to_string())
                });

            match built {
                Ok(pipeline) => {
                    self.next_id += 1;
                    self.launch(pipeline);
                }
                Err(error) => {
                    self.report.record_rejected();
                    self.events
                        .emit(LifecycleEvent::pipeline_rejected(name, parent, error));
                }
            }
        }
        submitted
    }

    fn buffer_leftover_child(&mut self, parent: &str, control: &PipelineControl) {
        if let Some(descriptor) = control.take_child_request() {
            self.events
                .emit(LifecycleEvent::child_submitted(parent, descriptor.name()));
            self.spawn_buffer.push(SpawnRequest {
                parent: parent.to_string(),
                descriptor,
            });
        }
    }

    async fn settle_decision(&mut self, pass: DecisionTask) {
        match pass.task.await {
            Ok(false) => {}
            Ok(true) => self.report.record_decision_failed(),
            Err(e) => {
                warn!(pipeline = %pass.name, error = %e, "Decision task did not finish cleanly");
                self.report.record_decision_failed();
            }
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        for entry in self.active.values() {
            entry.task.abort();
        }
        for pass in self.decisions.values() {
            pass.task.abort();
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("run_id", &self.report.run_id)
            .field("active", &self.active.len())
            .field("decisions", &self.decisions.len())
            .field("buffered", &self.spawn_buffer.len())
            .field("events", &self.events)
            .finish()
    }
}

fn run_outcome(joined: Result<anyhow::Result<()>, JoinError>) -> PipelineOutcome {
    match joined {
        Ok(Ok(())) => PipelineOutcome::Succeeded,
        Ok(Err(e)) => PipelineOutcome::Failed(format!("{:#}", e)),
        Err(e) if e.is_panic() => PipelineOutcome::Panicked(panic_message(e.into_panic().as_ref())),
        Err(_) => PipelineOutcome::Killed,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::DryRunBackend;
    use crate::orchestrator::events::MemorySink;
    use crate::pipeline::testing::NoopPipeline;
    use crate::pipeline::PipelineKind;
    use std::time::Duration;

    async fn orchestrator() -> (Orchestrator, MemorySink) {
        let sink = MemorySink::new();
        let config = OrchestratorConfig::new().with_poll_interval(Duration::from_millis(10));
        let orchestrator = Orchestrator::create(Arc::new(DryRunBackend::new()), config)
            .await
            .expect("dry-run orchestrator")
            .with_event_sink(Arc::new(sink.clone()));
        (orchestrator, sink)
    }

    fn broken_kind() -> PipelineKind {
        PipelineKind::from_fn("broken", |_| {
            Err(PipelineError::Construction("missing input".to_string()))
        })
    }

    #[tokio::test]
    async fn test_submit_assigns_sequential_ids() {
        let (mut orchestrator, _) = orchestrator().await;
        let ids = orchestrator
            .submit_pipelines(vec![
                PipelineDescriptor::of::<NoopPipeline>("a"),
                PipelineDescriptor::of::<NoopPipeline>("b"),
            ])
            .expect("batch submits");

        assert_eq!(ids, vec![PipelineId(1), PipelineId(2)]);
        assert_eq!(orchestrator.active_count(), 2);
        assert_eq!(orchestrator.report().pipelines_started, 2);
    }

    #[tokio::test]
    async fn test_submission_is_all_or_nothing() {
        let (mut orchestrator, sink) = orchestrator().await;
        let err = orchestrator
            .submit_pipelines(vec![
                PipelineDescriptor::of::<NoopPipeline>("good"),
                PipelineDescriptor::new("bad", broken_kind()),
            ])
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::Construction { ref name, .. } if name == "bad"));
        assert_eq!(orchestrator.active_count(), 0);
        assert!(sink.of_kind("pipeline_started").is_empty());

        let ids = orchestrator
            .submit_pipelines(vec![PipelineDescriptor::of::<NoopPipeline>("good")])
            .expect("retry submits");
        assert_eq!(ids, vec![PipelineId(1)]);
    }

    #[tokio::test]
    async fn test_invalid_descriptor_rejected_at_submission() {
        let (mut orchestrator, _) = orchestrator().await;
        let err = orchestrator
            .submit_pipelines(vec![PipelineDescriptor::of::<NoopPipeline>(" padded")])
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }

    #[tokio::test]
    async fn test_run_with_noop_pipelines() {
        let (mut orchestrator, sink) = orchestrator().await;
        let report = orchestrator
            .run(vec![
                PipelineDescriptor::of::<NoopPipeline>("a"),
                PipelineDescriptor::of::<NoopPipeline>("b"),
            ])
            .await
            .expect("run completes");

        assert!(orchestrator.is_idle());
        assert_eq!(report.pipelines_completed, 2);
        assert!(report.all_finished());
        assert!(report.finished_at.is_some());
        assert_eq!(sink.kinds_for("a"), vec!["pipeline_started", "pipeline_completed"]);
        assert_eq!(sink.of_kind("manager_starting").len(), 1);
        assert_eq!(sink.of_kind("manager_exiting").len(), 1);
    }

    #[tokio::test]
    async fn test_empty_run_exits_immediately() {
        let (mut orchestrator, _) = orchestrator().await;
        let report = orchestrator.run(Vec::new()).await.expect("nothing to do");
        assert_eq!(report.pipelines_started, 0);
        assert!(orchestrator.is_idle());
    }

    #[tokio::test]
    async fn test_initial_failure_propagates_from_run() {
        let (mut orchestrator, _) = orchestrator().await;
        let result = orchestrator
            .run(vec![PipelineDescriptor::new("bad", broken_kind())])
            .await;
        assert!(matches!(result, Err(OrchestratorError::Construction { .. })));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = OrchestratorConfig::new().with_poll_interval(Duration::ZERO);
        let result = Orchestrator::create(Arc::new(DryRunBackend::new()), config).await;
        assert!(matches!(result, Err(OrchestratorError::Config(_))));
    }

    #[test]
    fn test_panic_message_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(payload.as_ref()), "static str");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
