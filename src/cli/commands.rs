//! CLI command definitions for branchforge.
//!
//! Runs campaigns of adaptive pipelines from campaign files, validates
//! campaign files, and runs a self-contained generational demo.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tracing::info;

use crate::campaign::{random_branching, CampaignFile, GenerationalPipeline};
use crate::execution::{DryRunBackend, ExecutionBackend, ProcessBackend, ProcessBackendConfig};
use crate::orchestrator::{CampaignReport, Orchestrator, OrchestratorConfig};
use crate::pipeline::{PipelineDescriptor, Registry};

/// Orchestrator for dynamically branching pipeline campaigns.
#[derive(Parser)]
#[command(name = "branchforge")]
#[command(about = "Run campaigns of adaptive, self-branching pipelines")]
#[command(version)]
#[command(
    long_about = "branchforge runs pools of pipelines that execute shell work steps, pause to consult a decision procedure, and may spawn child pipelines or terminate early.\n\nExample usage:\n  branchforge run campaign.yaml\n  branchforge demo --pipelines 2 --spawn-probability 0.7 --seed 42 --dry-run"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a campaign file.
    Run(RunArgs),

    /// Resolve a campaign file and list its pipelines without running them.
    Validate(ValidateArgs),

    /// Run generational pipelines with the random branching decision procedure.
    Demo(DemoArgs),

    /// List registered pipeline kinds and decision procedures.
    Kinds,
}

/// Options shared by commands that run an orchestrator.
#[derive(clap::Args, Debug, Clone)]
pub struct ExecutionArgs {
    /// Record work steps instead of running them.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the run report as JSON.
    #[arg(long)]
    pub json: bool,

    /// Idle poll interval in milliseconds (overrides BRANCHFORGE_POLL_INTERVAL_MS).
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,
}

/// Arguments for `branchforge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Campaign file (.yaml, .yml or .json).
    pub campaign: PathBuf,

    #[command(flatten)]
    pub execution: ExecutionArgs,
}

/// Arguments for `branchforge validate`.
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Campaign file (.yaml, .yml or .json).
    pub campaign: PathBuf,

    /// Print the resolved pipelines as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `branchforge demo`.
#[derive(Parser, Debug)]
pub struct DemoArgs {
    /// Number of initial pipelines.
    #[arg(short = 'n', long, default_value = "1")]
    pub pipelines: usize,

    /// Generation limit for every lineage.
    #[arg(long, default_value = "3")]
    pub max_generations: u32,

    /// Chance that a generation spawns the next one.
    #[arg(long, default_value = "0.5")]
    pub spawn_probability: f64,

    /// Seed for reproducible branching.
    #[arg(long)]
    pub seed: Option<u64>,

    #[command(flatten)]
    pub execution: ExecutionArgs,
}

/// Parse command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => {
            let json = args.execution.json;
            let report = run_campaign_command(args).await?;
            print_report(&report, json)?;
        }
        Commands::Validate(args) => run_validate_command(args)?,
        Commands::Demo(args) => {
            let json = args.execution.json;
            let report = run_demo_command(args).await?;
            print_report(&report, json)?;
        }
        Commands::Kinds => run_kinds_command(),
    }
    Ok(())
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn run_campaign_command(args: RunArgs) -> anyhow::Result<CampaignReport> {
    let campaign = CampaignFile::from_path(&args.campaign)?;
    let descriptors = campaign.resolve(&Registry::with_builtins())?;
    info!(
        campaign = campaign.display_name(&args.campaign.display().to_string()),
        pipelines = descriptors.len(),
        "Campaign loaded"
    );
    run_orchestrator(descriptors, &args.execution).await
}

fn run_validate_command(args: ValidateArgs) -> anyhow::Result<()> {
    let campaign = CampaignFile::from_path(&args.campaign)?;
    let descriptors = campaign.resolve(&Registry::with_builtins())?;

    let rows: Vec<ResolvedPipeline> = descriptors
        .iter()
        .map(|d| {
            let (name, params) = d.to_constructor_args();
            ResolvedPipeline {
                name,
                kind: d.kind().name().to_string(),
                decision: d.decision().map(|f| f.name().to_string()),
                params: serde_json::Value::Object(params),
            }
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!(
        "✓ Campaign '{}' is valid ({} pipelines)",
        campaign.display_name(&args.campaign.display().to_string()),
        rows.len()
    );
    for row in rows {
        println!(
            "  {:<20} type={:<14} decision={:<20} params={}",
            row.name,
            row.kind,
            row.decision.as_deref().unwrap_or("-"),
            row.params
        );
    }
    Ok(())
}

async fn run_demo_command(args: DemoArgs) -> anyhow::Result<CampaignReport> {
    if !(0.0..=1.0).contains(&args.spawn_probability) {
        anyhow::bail!(
            "--spawn-probability must be between 0.0 and 1.0, got {}",
            args.spawn_probability
        );
    }
    if args.pipelines == 0 {
        anyhow::bail!("--pipelines must be at least 1");
    }

    let decision = random_branching(args.spawn_probability, args.seed);
    let descriptors = (1..=args.pipelines)
        .map(|i| {
            PipelineDescriptor::of::<GenerationalPipeline>(format!("p{}", i))
                .with_param("max_generations", args.max_generations)
                .with_decision(decision.clone())
        })
        .collect();

    run_orchestrator(descriptors, &args.execution).await
}

fn run_kinds_command() {
    let registry = Registry::with_builtins();
    println!("Pipeline kinds:");
    for kind in registry.kind_names() {
        println!("  {}", kind);
    }
    println!("Decision procedures:");
    for decision in registry.decision_names() {
        println!("  {}", decision);
    }
}

// ============================================================================
// Helpers
// ============================================================================

#[derive(Debug, Serialize)]
struct ResolvedPipeline {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    decision: Option<String>,
    params: serde_json::Value,
}

fn build_backend(dry_run: bool) -> anyhow::Result<Arc<dyn ExecutionBackend>> {
    if dry_run {
        return Ok(Arc::new(DryRunBackend::new()));
    }
    let config = ProcessBackendConfig::from_env()?;
    Ok(Arc::new(ProcessBackend::new(config)?))
}

fn build_config(args: &ExecutionArgs) -> anyhow::Result<OrchestratorConfig> {
    let mut config = OrchestratorConfig::from_env()?;
    if let Some(millis) = args.poll_interval_ms {
        config = config.with_poll_interval(Duration::from_millis(millis));
    }
    config.validate()?;
    Ok(config)
}

async fn run_orchestrator(
    descriptors: Vec<PipelineDescriptor>,
    args: &ExecutionArgs,
) -> anyhow::Result<CampaignReport> {
    let backend = build_backend(args.dry_run)?;
    let mut orchestrator = Orchestrator::create(backend, build_config(args)?).await?;
    let report = orchestrator.run(descriptors).await?;
    orchestrator.shutdown().await?;
    Ok(report)
}

fn print_report(report: &CampaignReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let seconds = report
        .duration()
        .map(|d| d.num_milliseconds() as f64 / 1000.0)
        .unwrap_or_default();

    println!("\n=== Campaign {} ===", report.run_id);
    println!("Pipelines started:   {}", report.pipelines_started);
    println!("  completed:         {}", report.pipelines_completed);
    println!("  failed:            {}", report.pipelines_failed);
    println!("  killed:            {}", report.pipelines_killed);
    println!("  rejected children: {}", report.pipelines_rejected);
    println!("Children spawned:    {}", report.children_spawned);
    println!(
        "Decision passes:     {} ({} failed)",
        report.decision_passes_started, report.decision_passes_failed
    );
    println!("Duration:            {:.2}s", seconds);
    println!();
    for record in &report.pipelines {
        let outcome = record
            .outcome
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "running".to_string());
        println!(
            "  {:<6} {:<24} parent={:<20} decisions={:<3} {}",
            record.id.to_string(),
            record.name,
            record.parent.as_deref().unwrap_or("-"),
            record.decision_passes,
            outcome
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command_arguments() {
        let cli = Cli::try_parse_from([
            "branchforge",
            "run",
            "campaign.yaml",
            "--dry-run",
            "--json",
            "--poll-interval-ms",
            "25",
        ])
        .expect("should parse");

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.campaign, PathBuf::from("campaign.yaml"));
                assert!(args.execution.dry_run);
                assert!(args.execution.json);
                assert_eq!(args.execution.poll_interval_ms, Some(25));
            }
            _ => panic!("Expected Run command"),
        }
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_demo_command_defaults() {
        let cli = Cli::try_parse_from(["branchforge", "demo"]).expect("should parse");
        match cli.command {
            Commands::Demo(args) => {
                assert_eq!(args.pipelines, 1);
                assert_eq!(args.max_generations, 3);
                assert!((args.spawn_probability - 0.5).abs() < f64::EPSILON);
                assert!(args.seed.is_none());
                assert!(!args.execution.dry_run);
            }
            _ => panic!("Expected Demo command"),
        }
    }

    #[test]
    fn test_global_log_level() {
        let cli = Cli::try_parse_from(["branchforge", "kinds", "--log-level", "debug"])
            .expect("should parse");
        assert_eq!(cli.log_level, "debug");
        assert!(matches!(cli.command, Commands::Kinds));
    }

    fn dry_run_demo(spawn_probability: f64) -> DemoArgs {
        DemoArgs {
            pipelines: 2,
            max_generations: 3,
            spawn_probability,
            seed: Some(42),
            execution: ExecutionArgs {
                dry_run: true,
                json: false,
                poll_interval_ms: Some(5),
            },
        }
    }

    #[tokio::test]
    async fn test_demo_spawns_every_generation_at_full_probability() {
        let report = run_demo_command(dry_run_demo(1.0)).await.expect("demo runs");

        assert_eq!(report.pipelines_started, 6);
        assert_eq!(report.children_spawned, 4);
        assert_eq!(report.pipelines_completed, 6);
        assert!(report.pipeline("p1_g2_g3").is_some());
        assert!(report.pipeline("p2_g2_g3").is_some());
        assert!(report.all_finished());
    }

    #[tokio::test]
    async fn test_demo_without_branching() {
        let report = run_demo_command(dry_run_demo(0.0)).await.expect("demo runs");
        assert_eq!(report.pipelines_started, 2);
        assert_eq!(report.children_spawned, 0);
        assert_eq!(report.decision_passes_started, 2);
    }

    #[tokio::test]
    async fn test_demo_rejects_bad_probability() {
        let result = run_demo_command(dry_run_demo(1.5)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_campaign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("campaign.yaml");
        std::fs::write(
            &path,
            "pipelines:\n  - name: solo\n    type: generational\n    config:\n      max_generations: 1\n",
        )
        .unwrap();

        let report = run_campaign_command(RunArgs {
            campaign: path,
            execution: ExecutionArgs {
                dry_run: true,
                json: true,
                poll_interval_ms: Some(5),
            },
        })
        .await
        .expect("campaign runs");

        assert_eq!(report.pipelines_started, 1);
        assert_eq!(report.pipelines_completed, 1);
    }
}
