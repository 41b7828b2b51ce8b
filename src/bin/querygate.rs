//! Binary entry point for the querygate CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand, ValueEnum};
use querygate::{
    config::PlannerConfig,
    logging::init_logging,
    planner::{HeuristicAnalyzer, Planner},
    EngineBuilder, EngineConfig, OptimizationSuggestion, PerformanceReport, QueryOptions,
    QueryPlan, SchemaCatalog, SimulatedExecutor,
};
use serde_json::{json, Value};

#[derive(Parser, Debug)]
#[command(
    name = "querygate",
    version,
    about = "Inspect plans, suggest indexes and simulate workloads",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        env = "QUERYGATE_LOG",
        default_value = "warn",
        help = "tracing filter directive"
    )]
    log_level: String,

    #[command(flatten)]
    schema: SchemaArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct SchemaArgs {
    #[arg(
        long = "table",
        global = true,
        value_name = "TABLE=col1,col2",
        help = "Register a table and its columns (repeatable)"
    )]
    tables: Vec<String>,

    #[arg(
        long = "index",
        global = true,
        value_name = "TABLE=col",
        help = "Register an existing index (repeatable)"
    )]
    indexes: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Show the plan produced for a query")]
    Explain {
        #[arg(value_name = "QUERY")]
        query: String,

        #[arg(long, value_name = "JSON", help = "Parameters as a JSON array")]
        params: Option<String>,
    },

    #[command(about = "Suggest indexes for the queries in a file, one per line")]
    Suggest {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    #[command(about = "Drive the engine against a simulated executor")]
    Simulate(SimulateCmd),
}

#[derive(Args, Debug)]
struct SimulateCmd {
    #[arg(long, default_value_t = 200, help = "Queries to issue")]
    queries: usize,

    #[arg(long, default_value_t = 8, help = "Concurrent client tasks")]
    concurrency: usize,

    #[arg(long, default_value_t = 5, help = "Base executor latency (ms)")]
    latency_ms: u64,

    #[arg(long, default_value_t = 0, help = "Random extra latency (ms)")]
    jitter_ms: u64,

    #[arg(long, value_name = "FILE", help = "Engine configuration (TOML)")]
    config: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;
    let catalog = build_catalog(&cli.schema)?;

    match cli.command {
        Command::Explain { query, params } => {
            let params = parse_params(params.as_deref())?;
            let planner = Planner::with_catalog(
                PlannerConfig::default(),
                Arc::new(HeuristicAnalyzer),
                catalog,
            );
            let plan = planner.preview(&query, &params);
            emit(&cli.format, &plan, || print_plan_text(&plan))?;
        }
        Command::Suggest { file } => {
            let raw = std::fs::read_to_string(&file)?;
            let queries: Vec<&str> = raw
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with("--"))
                .collect();
            let planner = Planner::with_catalog(
                PlannerConfig::default(),
                Arc::new(HeuristicAnalyzer),
                catalog,
            );
            let suggestions = planner.suggest_indexes(Some(queries.as_slice()));
            emit(&cli.format, &suggestions, || {
                print_suggestions_text(&suggestions)
            })?;
        }
        Command::Simulate(cmd) => {
            let (report, elapsed) = simulate(&cmd, catalog).await?;
            emit(&cli.format, &report, || print_report_text(&report, elapsed))?;
        }
    }
    Ok(())
}

fn split_assignment(raw: &str) -> Result<(&str, Vec<&str>), Box<dyn Error>> {
    let (table, columns) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected TABLE=col1,col2, got {raw:?}"))?;
    let columns: Vec<&str> = columns
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();
    if table.trim().is_empty() || columns.is_empty() {
        return Err(format!("expected TABLE=col1,col2, got {raw:?}").into());
    }
    Ok((table.trim(), columns))
}

fn build_catalog(args: &SchemaArgs) -> Result<SchemaCatalog, Box<dyn Error>> {
    let mut catalog = SchemaCatalog::new();
    for raw in &args.tables {
        let (table, columns) = split_assignment(raw)?;
        catalog.register_table(table, columns);
    }
    for raw in &args.indexes {
        let (table, columns) = split_assignment(raw)?;
        catalog.register_index(table, columns);
    }
    Ok(catalog)
}

fn parse_params(raw: Option<&str>) -> Result<Vec<Value>, Box<dyn Error>> {
    match raw {
        None => Ok(Vec::new()),
        Some(raw) => match serde_json::from_str::<Value>(raw)? {
            Value::Array(values) => Ok(values),
            other => Ok(vec![other]),
        },
    }
}

/// Read-heavy mix with a few joins, aggregates and writes.
const WORKLOAD: &[&str] = &[
    "SELECT * FROM projects WHERE user_id = ?",
    "SELECT * FROM projects WHERE user_id = ?",
    "SELECT p.name, u.email FROM projects p JOIN users u ON p.user_id = u.id WHERE u.id = ?",
    "SELECT status, COUNT(*) FROM tasks WHERE project_id = ? GROUP BY status ORDER BY status",
    "SELECT * FROM users WHERE email = ?",
    "UPDATE tasks SET status = 'done' WHERE id = ?",
];

fn demo_catalog(mut catalog: SchemaCatalog) -> SchemaCatalog {
    if catalog.columns("projects").is_none() {
        catalog.register_table("projects", ["id", "user_id", "name", "created_at"]);
    }
    if catalog.columns("users").is_none() {
        catalog.register_table("users", ["id", "email", "name"]);
    }
    catalog
}

async fn simulate(
    cmd: &SimulateCmd,
    catalog: SchemaCatalog,
) -> Result<(PerformanceReport, Duration), Box<dyn Error>> {
    let config = match &cmd.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let executor = Arc::new(
        SimulatedExecutor::builder()
            .latency(Duration::from_millis(cmd.latency_ms))
            .jitter(Duration::from_millis(cmd.jitter_ms))
            .build(),
    );
    let engine = EngineBuilder::new(config)
        .executor(executor)
        .catalog(demo_catalog(catalog))
        .build()?;

    let workers = cmd.concurrency.max(1);
    let started = Instant::now();
    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let engine = engine.clone();
        let total = cmd.queries;
        handles.push(tokio::spawn(async move {
            for n in (worker..total).step_by(workers) {
                let query = WORKLOAD[n % WORKLOAD.len()];
                let params = [json!(format!("id-{}", n % 7))];
                // Failures are counted by the engine and show up in the report.
                let _ = engine.execute(query, &params, QueryOptions::default()).await;
            }
        }));
    }
    for handle in handles {
        handle.await?;
    }
    let elapsed = started.elapsed();
    let report = engine.analyze()?;
    engine.cleanup().await;
    Ok((report, elapsed))
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_plan_text(plan: &QueryPlan) {
    println!("Plan {} ({})", plan.plan_id, plan.kind);
    println!("  original:  {}", plan.original_query);
    println!("  rewritten: {}", plan.rewritten_query);
    println!(
        "  cost={} joins={} tables={}",
        plan.estimated_cost,
        plan.join_count,
        plan.tables.join(",")
    );
    if !plan.indexes_referenced.is_empty() {
        println!("  predicate columns: {}", plan.indexes_referenced.join(", "));
    }
    if !plan.suggested_indexes.is_empty() {
        println!("  suggested indexes: {}", plan.suggested_indexes.join(", "));
    }
    for optimization in &plan.applied_optimizations {
        println!("  applied: {optimization}");
    }
}

fn print_suggestions_text(suggestions: &[OptimizationSuggestion]) {
    if suggestions.is_empty() {
        println!("No index suggestions.");
        return;
    }
    for s in suggestions {
        println!("[{}] {}", s.priority, s.recommendation);
        println!("    {} ({})", s.rationale, s.estimated_improvement);
    }
}

fn print_report_text(report: &PerformanceReport, elapsed: Duration) {
    println!(
        "Simulation finished in {:.2} ms",
        elapsed.as_secs_f64() * 1_000.0
    );
    print!("{report}");
}
