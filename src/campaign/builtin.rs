//! Built-in pipeline kinds and decision procedures.
//!
//! - `generational` + `random_branching`: each generation may spawn the
//!   next one until a generation limit is reached
//! - `score_split` + `split_on_regression`: items whose score got worse are
//!   moved into a sub-pipeline, and a parent left without items terminates

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::{RngExt, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::execution::{StepOutput, StepTable};
use crate::pipeline::{
    BuildPipeline, DecisionFn, ParamMap, Pipeline, PipelineContext, PipelineScores, Registry,
};

/// Default chance that `random_branching` spawns the next generation.
pub const DEFAULT_SPAWN_PROBABILITY: f64 = 0.5;

/// Default limit on nested `score_split` sub-pipelines.
pub const DEFAULT_MAX_SUB_PIPELINES: u32 = 3;

impl Registry {
    /// A registry holding every built-in kind and decision procedure.
    pub fn with_builtins() -> Self {
        let mut registry = Registry::new();
        registry
            .register_pipeline::<GenerationalPipeline>()
            .register_pipeline::<ScoreSplitPipeline>()
            .register_decision(random_branching(DEFAULT_SPAWN_PROBABILITY, None))
            .register_decision(split_on_regression());
        registry
    }
}

/// Quotes a string for `sh`.
fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "'\\''"))
}

// ============================================================================
// generational
// ============================================================================

/// A three-step pipeline with one decision handshake between its second and
/// third step.
pub struct GenerationalPipeline {
    ctx: PipelineContext,
    steps: StepTable,
    generation: u32,
    parent_name: String,
    max_generations: u32,
}

impl GenerationalPipeline {
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn parent_name(&self) -> &str {
        &self.parent_name
    }

    pub fn max_generations(&self) -> u32 {
        self.max_generations
    }

    fn register_echo(&mut self, step: &str, message: &str) -> Result<(), PipelineError> {
        let command = format!(
            "echo {}",
            shell_quote(&format!(
                "[{}] Gen-{}: {}",
                self.ctx.name(),
                self.generation,
                message
            ))
        );
        self.steps.register(step, move |_| command.clone())
    }
}

impl BuildPipeline for GenerationalPipeline {
    const KIND: &'static str = "generational";

    fn build(ctx: PipelineContext) -> Result<Self, PipelineError> {
        let generation = ctx.param_or("generation", 1)?;
        let parent_name = ctx.param_or("parent_name", "root".to_string())?;
        let max_generations = ctx.param_or("max_generations", 3)?;
        let steps = ctx.step_table();
        Ok(Self {
            ctx,
            steps,
            generation,
            parent_name,
            max_generations,
        })
    }
}

#[async_trait]
impl Pipeline for GenerationalPipeline {
    fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    fn register_work_steps(&mut self) -> Result<(), PipelineError> {
        self.register_echo("sequence_analysis", "Analyzing sequences")?;
        self.register_echo("fitness_evaluation", "Evaluating fitness scores")?;
        self.register_echo("optimization_step", "Running optimization")?;
        Ok(())
    }

    async fn run(&self) -> anyhow::Result<()> {
        info!(
            pipeline = self.ctx.name(),
            generation = self.generation,
            parent = %self.parent_name,
            "Generation starting"
        );

        self.steps.call("sequence_analysis").await?;
        self.steps.call("fitness_evaluation").await?;

        self.ctx.request_decision_and_wait().await;

        self.steps.call("optimization_step").await?;
        info!(pipeline = self.ctx.name(), generation = self.generation, "Generation finished");
        Ok(())
    }
}

/// Spawns `<name>_g<generation + 1>` with the given probability until the
/// pipeline's generation limit is reached.
///
/// With a seed, the sequence of spawn decisions is reproducible for a given
/// order of decision passes.
pub fn random_branching(spawn_probability: f64, seed: Option<u64>) -> DecisionFn {
    let spawn_probability = if spawn_probability.is_nan() {
        0.0
    } else {
        spawn_probability.clamp(0.0, 1.0)
    };
    let rng = match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_rng(&mut rand::rng()),
    };
    let rng = Arc::new(Mutex::new(rng));

    DecisionFn::for_pipeline::<GenerationalPipeline, _, _>(
        "random_branching",
        move |pipeline| {
            let rng = Arc::clone(&rng);
            async move {
                if pipeline.generation() >= pipeline.max_generations() {
                    info!(
                        pipeline = pipeline.name(),
                        generation = pipeline.generation(),
                        "Generation limit reached"
                    );
                    return Ok(());
                }

                let spawn = rng
                    .lock()
                    .expect("lock not poisoned")
                    .random_bool(spawn_probability);
                if !spawn {
                    info!(pipeline = pipeline.name(), "Not spawning a new generation");
                    return Ok(());
                }

                let ctx = pipeline.context();
                let child = ctx
                    .child_descriptor(format!("{}_g{}", ctx.name(), pipeline.generation() + 1))
                    .with_param("generation", pipeline.generation() + 1)
                    .with_param("parent_name", ctx.name())
                    .with_param("max_generations", pipeline.max_generations());
                info!(pipeline = ctx.name(), child = child.name(), "Spawning next generation");
                ctx.request_child_spawn(child);
                Ok(())
            }
        },
    )
}

// ============================================================================
// score_split
// ============================================================================

/// Scores a set of named items, lets a decision procedure move regressed
/// items elsewhere, then refines whatever items remain.
pub struct ScoreSplitPipeline {
    ctx: PipelineContext,
    steps: StepTable,
    items: Mutex<BTreeMap<String, String>>,
    current_scores: Mutex<BTreeMap<String, f64>>,
    previous_scores: BTreeMap<String, f64>,
    sub_order: u32,
    max_sub_pipelines: u32,
}

impl ScoreSplitPipeline {
    pub fn sub_order(&self) -> u32 {
        self.sub_order
    }

    pub fn max_sub_pipelines(&self) -> u32 {
        self.max_sub_pipelines
    }

    /// Items still owned by this pipeline.
    pub fn items(&self) -> BTreeMap<String, String> {
        self.items.lock().expect("lock not poisoned").clone()
    }

    /// Removes the named items and returns those that were present.
    pub fn take_items<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> BTreeMap<String, String> {
        let mut items = self.items.lock().expect("lock not poisoned");
        names
            .into_iter()
            .filter_map(|name| items.remove(name).map(|value| (name.clone(), value)))
            .collect()
    }

    fn items_arg(&self) -> anyhow::Result<ParamMap> {
        let mut args = ParamMap::new();
        args.insert("items".to_string(), serde_json::to_value(self.items())?);
        Ok(args)
    }
}

/// Placeholder score in `[0, 1)`, derived from the item value and depth.
fn placeholder_score(value: &str, sub_order: u32) -> f64 {
    let sum: u64 = value.bytes().map(u64::from).sum::<u64>() + 7 * u64::from(sub_order);
    (sum % 100) as f64 / 100.0
}

/// Parses `<item> <score>` lines; malformed lines are skipped.
pub fn parse_scores(output: &StepOutput) -> BTreeMap<String, f64> {
    let mut scores = BTreeMap::new();
    for line in output.stdout.lines() {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next().map(str::parse::<f64>)) {
            (Some(item), Some(Ok(score))) => {
                scores.insert(item.to_string(), score);
            }
            (None, _) => {}
            _ => warn!(step = %output.step, line = line, "Ignoring malformed score line"),
        }
    }
    scores
}

impl BuildPipeline for ScoreSplitPipeline {
    const KIND: &'static str = "score_split";

    fn build(ctx: PipelineContext) -> Result<Self, PipelineError> {
        let items: BTreeMap<String, String> = ctx.param_or("items", BTreeMap::new())?;
        let previous_scores = ctx.param_or("previous_scores", BTreeMap::new())?;
        let sub_order = ctx.param_or("sub_order", 0)?;
        let max_sub_pipelines = ctx.param_or("max_sub_pipelines", DEFAULT_MAX_SUB_PIPELINES)?;

        if let Some(bad) = items.keys().find(|k| k.is_empty() || k.contains(char::is_whitespace)) {
            return Err(PipelineError::InvalidParameter {
                key: "items".to_string(),
                message: format!("item name '{}' must be a single non-empty word", bad),
            });
        }

        let steps = ctx.step_table();
        Ok(Self {
            ctx,
            steps,
            items: Mutex::new(items),
            current_scores: Mutex::new(BTreeMap::new()),
            previous_scores,
            sub_order,
            max_sub_pipelines,
        })
    }
}

#[async_trait]
impl Pipeline for ScoreSplitPipeline {
    fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    fn register_work_steps(&mut self) -> Result<(), PipelineError> {
        let sub_order = self.sub_order;
        self.steps.register("score_items", move |args| {
            let items: BTreeMap<String, String> = args
                .get("items")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default();
            let lines: Vec<String> = items
                .iter()
                .map(|(name, value)| format!("{} {:.2}", name, placeholder_score(value, sub_order)))
                .collect();
            if lines.is_empty() {
                "true".to_string()
            } else {
                format!("printf '%s\\n' {}", lines.iter().map(|l| shell_quote(l)).collect::<Vec<_>>().join(" "))
            }
        })?;

        let name = self.ctx.name().to_string();
        self.steps.register("refine_items", move |args| {
            let count = args
                .get("items")
                .and_then(Value::as_object)
                .map_or(0, |items| items.len());
            format!("echo {}", shell_quote(&format!("[{}] Refining {} items", name, count)))
        })?;
        Ok(())
    }

    async fn run(&self) -> anyhow::Result<()> {
        let output = self.steps.call_with("score_items", &self.items_arg()?).await?;
        let scores = parse_scores(&output);
        info!(pipeline = self.ctx.name(), scored = scores.len(), "Items scored");
        *self.current_scores.lock().expect("lock not poisoned") = scores;

        self.ctx.request_decision_and_wait().await;

        let remaining = self.items_arg()?;
        self.steps.call_with("refine_items", &remaining).await?;
        Ok(())
    }

    async fn scores(&self) -> PipelineScores {
        PipelineScores {
            current: self.current_scores.lock().expect("lock not poisoned").clone(),
            previous: self.previous_scores.clone(),
        }
    }
}

/// Moves items whose score went up (worse) into `<name>_sub<n>`.
///
/// Nothing moves once the sub-pipeline limit is reached. A parent left
/// with no items asks to be terminated.
pub fn split_on_regression() -> DecisionFn {
    DecisionFn::for_pipeline::<ScoreSplitPipeline, _, _>("split_on_regression", |pipeline| async move {
        if pipeline.sub_order() >= pipeline.max_sub_pipelines() {
            info!(pipeline = pipeline.name(), "Sub-pipeline limit reached");
            return Ok(());
        }

        let scores = pipeline.scores().await;
        let regressed: Vec<&String> = scores
            .current
            .iter()
            .filter(|(item, score)| scores.previous.get(*item).is_some_and(|prev| *score > prev))
            .map(|(item, _)| item)
            .collect();
        let moved = pipeline.take_items(regressed);
        if moved.is_empty() {
            return Ok(());
        }

        let ctx = pipeline.context();
        let sub_order = pipeline.sub_order() + 1;
        let child = ctx
            .child_descriptor(format!("{}_sub{}", ctx.name(), sub_order))
            .with_param("items", serde_json::to_value(&moved)?)
            .with_param("previous_scores", serde_json::to_value(&scores.current)?)
            .with_param("sub_order", sub_order)
            .with_param("max_sub_pipelines", pipeline.max_sub_pipelines());
        info!(
            pipeline = ctx.name(),
            child = child.name(),
            moved = moved.len(),
            "Moving regressed items to a sub-pipeline"
        );
        ctx.request_child_spawn(child);

        if pipeline.items().is_empty() {
            info!(pipeline = ctx.name(), "No items left; terminating");
            ctx.request_termination();
        }
        Ok(())
    })
}
