mod demo_executor;
mod plan_file;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use loom_core::config::{LoggingConfig, StoreConfig, StoreKind};
use loom_core::domain::{ExecutionPlan, PlanMetrics, TaskStatus, Worker};
use loom_core::impls::{HashEmbedder, InMemoryStore, JsonlStore, MatchingExecutor, TracingMetricsSink};
use loom_core::ports::{EmbeddingService, MetricsSink, PersistentStore, TaskExecutor};
use loom_core::{LoomConfig, PlanOptimizer, Scheduler, WorkerMatcher};

use crate::demo_executor::DemoExecutor;
use crate::plan_file::PlanFile;

#[derive(Debug, Parser)]
#[command(name = "loom", version, about = "Run task plans and learn from past executions")]
struct Cli {
    /// Config file (default: ./loom.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a plan file end to end and record the execution
    Run(RunArgs),
    /// Show similar past executions and suggested changes without running
    Suggest(SuggestArgs),
    /// Summarize recorded executions
    History(StoreArgs),
}

#[derive(Debug, Args)]
struct StoreArgs {
    /// JSON Lines store (overrides the configured store)
    #[arg(long)]
    store: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(value_name = "PLAN")]
    plan: PathBuf,

    #[command(flatten)]
    store: StoreArgs,

    /// Overrides the plan's max_concurrent
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Quality score recorded with the execution (0..1)
    #[arg(long, default_value_t = 1.0)]
    quality: f64,
}

#[derive(Debug, Args)]
struct SuggestArgs {
    #[arg(value_name = "PLAN")]
    plan: PathBuf,

    #[command(flatten)]
    store: StoreArgs,
}

/// Shared services built from config.
struct Services {
    config: LoomConfig,
    store: Arc<dyn PersistentStore>,
    embedder: Arc<dyn EmbeddingService>,
    metrics: Arc<dyn MetricsSink>,
}

impl Services {
    fn build(mut config: LoomConfig, store_override: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = store_override {
            config.store = StoreConfig {
                kind: StoreKind::Jsonl,
                path: Some(path),
            };
        }
        Ok(Self {
            store: open_store(&config.store)?,
            embedder: Arc::new(HashEmbedder::new(config.embedding.dimensions)),
            metrics: Arc::new(TracingMetricsSink),
            config,
        })
    }

    fn optimizer(&self) -> PlanOptimizer {
        PlanOptimizer::new(
            self.embedder.clone(),
            self.store.clone(),
            self.config.optimizer.clone(),
        )
        .with_metrics(self.metrics.clone())
    }

    fn load_plan(&self, path: &Path) -> anyhow::Result<(ExecutionPlan, Vec<Worker>)> {
        PlanFile::load(path)?.into_plan(&self.config.scheduler)
    }
}

fn open_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn PersistentStore>> {
    Ok(match config.kind {
        StoreKind::Memory => Arc::new(InMemoryStore::new()),
        StoreKind::Jsonl => {
            let path = config
                .path
                .clone()
                .context("store.kind = \"jsonl\" needs store.path")?;
            Arc::new(JsonlStore::new(path))
        }
    })
}

/// RUST_LOG wins; otherwise the configured level.
fn init_logging(config: &LoggingConfig, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("invalid log level {:?}", config.level))?;
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries the JSON report
    if json || config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .context("cannot install JSON logger")?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .context("cannot install logger")?;
    }
    Ok(())
}

async fn run(services: Services, args: RunArgs) -> anyhow::Result<()> {
    let (mut plan, workers) = services.load_plan(&args.plan)?;
    if let Some(max_concurrent) = args.max_concurrent {
        let mut config = plan.config().clone();
        config.max_concurrent = max_concurrent;
        plan = plan.with_config(config);
    }

    let optimizer = services.optimizer();
    let similar = optimizer.detect_similar_plans(&plan).await;
    for suggestion in &similar.suggestions {
        tracing::info!(
            kind = ?suggestion.kind,
            confidence = suggestion.confidence,
            recurrence = suggestion.recurrence,
            "suggestion from similar executions"
        );
    }

    // Workers in the plan file: assign tasks through the matcher.
    let matching = (!workers.is_empty()).then(|| {
        let matcher = WorkerMatcher::new(services.embedder.clone(), services.config.matcher.clone())
            .with_store(services.store.clone())
            .with_metrics(services.metrics.clone());
        let pool = workers.into_iter().fold(
            MatchingExecutor::new(Arc::new(matcher)).with_default(Arc::new(DemoExecutor::default())),
            |pool, worker| {
                let executor = Arc::new(DemoExecutor::for_worker(worker.name.clone()));
                pool.with_worker(worker, executor)
            },
        );
        Arc::new(pool)
    });
    let executor: Arc<dyn TaskExecutor> = match &matching {
        Some(pool) => pool.clone(),
        None => Arc::new(DemoExecutor::default()),
    };

    let scheduler = Scheduler::with_config(executor, &services.config.scheduler)
        .with_store(services.store.clone())
        .with_metrics(services.metrics.clone());
    scheduler.submit_plan(&plan).await?;
    let report = scheduler.process_queue(plan.config().max_concurrent).await;

    let assignments = matching.map(|pool| pool.assignments()).unwrap_or_default();
    let metrics = PlanMetrics::from_run(&report, args.quality, assignments);
    let record = match optimizer.store_plan_execution(&plan, metrics).await {
        Ok(record) => Some(serde_json::json!({
            "fingerprint": record.fingerprint,
            "occurrence": record.occurrence,
        })),
        Err(err) => {
            tracing::warn!(error = %err, "plan execution not recorded");
            None
        }
    };

    let output = serde_json::json!({
        "plan_id": plan.id(),
        "goal": plan.goal(),
        "similar": similar,
        "report": report,
        "record": record,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    let unfinished = report
        .tasks
        .iter()
        .filter(|t| t.status != TaskStatus::Succeeded)
        .count();
    if unfinished > 0 {
        anyhow::bail!("{unfinished} task(s) did not succeed");
    }
    Ok(())
}

async fn suggest(services: Services, args: SuggestArgs) -> anyhow::Result<()> {
    let (plan, _) = services.load_plan(&args.plan)?;
    let report = services.optimizer().detect_similar_plans(&plan).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn history(services: Services) -> anyhow::Result<()> {
    let summary = services.optimizer().history_summary().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = LoomConfig::load(cli.config.as_deref())?;
    init_logging(&config.logging, cli.json_logs)?;

    match cli.command {
        Command::Run(args) => {
            let services = Services::build(config, args.store.store.clone())?;
            run(services, args).await
        }
        Command::Suggest(args) => {
            let services = Services::build(config, args.store.store.clone())?;
            suggest(services, args).await
        }
        Command::History(args) => history(Services::build(config, args.store)?).await,
    }
}
