//! Command line front end for the GraphRAG optimizer
//!
//! Builds plans, executes queries against a JSON graph fixture loaded into the
//! in-memory processor, and reports aggregated performance.

use clap::{Args, Parser, Subcommand};
use eyre::{Result, WrapErr};
use graphrag_optimizer::config::OptimizerConfig;
use graphrag_optimizer::query::{Priority, Query};
use graphrag_optimizer::{init_logging, InMemoryGraphProcessor, UnifiedOptimizer};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "graphrag-optimizer", version, about = "Adaptive GraphRAG query optimizer")]
struct Cli {
    /// TOML configuration file; GRAPHRAG_* environment variables are used otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Overrides the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the optimized plan for a query
    Plan {
        #[command(flatten)]
        query: QueryArgs,
        /// Print the step-by-step execution plan instead
        #[arg(long)]
        steps: bool,
    },
    /// Optimize and execute a query against a graph fixture
    Execute {
        #[command(flatten)]
        query: QueryArgs,
        /// JSON graph fixture
        #[arg(short, long)]
        graph: PathBuf,
        #[arg(long)]
        skip_cache: bool,
        /// Learning state loaded before and saved after execution
        #[arg(long)]
        learning_state: Option<PathBuf>,
    },
    /// Execute a batch of queries and print the performance analysis
    Report {
        /// JSON graph fixture
        #[arg(short, long)]
        graph: PathBuf,
        /// File with one JSON query per line
        #[arg(short, long)]
        queries: PathBuf,
        #[arg(long, default_value = "normal")]
        priority: Priority,
        /// Analysis window in seconds
        #[arg(long, default_value_t = 3600.0)]
        window: f64,
        /// Export per-query metrics as CSV
        #[arg(long)]
        metrics_csv: Option<PathBuf>,
    },
}

#[derive(Args)]
struct QueryArgs {
    /// Query as inline JSON, or @path to a JSON file
    #[arg(short, long)]
    query: String,
    #[arg(short, long, default_value = "normal")]
    priority: Priority,
}

impl QueryArgs {
    fn parse_query(&self) -> Result<Query> {
        let body = match self.query.strip_prefix('@') {
            Some(path) => std::fs::read_to_string(path)
                .wrap_err_with(|| format!("Failed to read query file {}", path))?,
            None => self.query.clone(),
        };
        serde_json::from_str(&body).wrap_err("Query is not valid JSON")
    }
}

fn load_config(cli: &Cli) -> Result<OptimizerConfig> {
    let mut config = match &cli.config {
        Some(path) => OptimizerConfig::load_from_file(path)
            .wrap_err_with(|| format!("Failed to load configuration from {}", path.display()))?,
        None => OptimizerConfig::load_from_env().wrap_err("Invalid GRAPHRAG_* environment")?,
    };
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    Ok(config)
}

fn load_graph(path: &Path) -> Result<InMemoryGraphProcessor> {
    let graph = InMemoryGraphProcessor::load_fixture(path)
        .wrap_err_with(|| format!("Failed to load graph fixture {}", path.display()))?;
    info!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "Graph fixture loaded"
    );
    Ok(graph)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config.logging)?;
    info!(
        version = graphrag_optimizer::VERSION,
        profile = graphrag_optimizer::BUILD_PROFILE,
        "Starting GraphRAG optimizer"
    );

    let optimizer = UnifiedOptimizer::new(config);

    match cli.command {
        Command::Plan { query, steps } => {
            let parsed = query.parse_query()?;
            if steps {
                print_json(&optimizer.get_execution_plan(&parsed, query.priority).await)?;
            } else {
                print_json(&optimizer.optimize(&parsed, query.priority).await)?;
            }
        }
        Command::Execute {
            query,
            graph,
            skip_cache,
            learning_state,
        } => {
            let parsed = query.parse_query()?;
            let processor = load_graph(&graph)?;
            if let Some(path) = learning_state.as_deref().filter(|p| p.exists()) {
                optimizer.load_learning_state(path)?;
            }

            let (results, execution) = optimizer
                .execute(&processor, &parsed, query.priority, skip_cache)
                .await?;
            print_json(&json!({ "results": results, "execution": execution }))?;

            if let Some(path) = &learning_state {
                optimizer.save_learning_state(path)?;
            }
        }
        Command::Report {
            graph,
            queries,
            priority,
            window,
            metrics_csv,
        } => {
            let processor = load_graph(&graph)?;
            let body = std::fs::read_to_string(&queries)
                .wrap_err_with(|| format!("Failed to read {}", queries.display()))?;

            let mut executed = 0usize;
            for (line_no, line) in body.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let query: Query = serde_json::from_str(line)
                    .wrap_err_with(|| format!("Invalid query on line {}", line_no + 1))?;
                optimizer
                    .execute(&processor, &query, priority, false)
                    .await
                    .wrap_err_with(|| format!("Query on line {} failed", line_no + 1))?;
                executed += 1;
            }
            info!(executed, "Batch executed");

            if let Some(path) = &metrics_csv {
                optimizer.metrics().export_csv(path)?;
            }
            print_json(&optimizer.analyze_performance(window))?;
        }
    }

    Ok(())
}
