//! Thin demonstration CLI: compiles and runs one `.sf` pipeline file end
//! to end. Not the specification's subject — SQLFlow is a library first
//! — but shipped the way the teacher ships `cmd::run_pipeline`, since a
//! library with no entry point at all would be untrue to its shape.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};

use sqlflow::ast::parse_param_map;
use sqlflow::config::{generate_pipeline_id, load_dotenv, Profile};
use sqlflow::connector::csv::CsvConnectorFactory;
use sqlflow::connector::rest::RestConnectorFactory;
use sqlflow::connector::ConnectorRegistry;
use sqlflow::engine::{DataFusionEngine, EngineMode};
use sqlflow::executor::{CancellationToken, ExecutionOutcome, Executor};
use sqlflow::planner::plan;
use sqlflow::resolver::{resolve, FsIncludeLoader};
use sqlflow::validator::validate;
use sqlflow::variables::VariableManager;
use sqlflow::watermark::{FileWatermarkStore, InMemoryWatermarkStore, WatermarkStore};

/// Command-line interface for compiling and running a single SQLFlow
/// pipeline file.
#[derive(Parser, Debug)]
#[command(
    name = "sqlflow",
    version,
    about = "Compile and run a .sf data pipeline against an embedded SQL engine.",
    long_about = "Compile and run a .sf data pipeline: lex, parse, resolve variables \
and includes, validate, plan a dependency DAG, and execute it against an \
embedded columnar SQL engine with pluggable connectors."
)]
struct Cli {
    /// Path to the `.sf` pipeline file to run.
    pipeline: PathBuf,

    /// Path to a YAML profile file supplying variable bindings and
    /// persistent-mode storage locations.
    #[arg(long = "profile", value_name = "FILE")]
    profile: Option<PathBuf>,

    /// Inline variable overrides as a JSON object, e.g. '{"env":"prod"}'.
    /// Takes precedence over profile and `SET` bindings (spec.md §4.14).
    #[arg(long = "vars", value_name = "JSON")]
    vars: Option<String>,

    /// Path to a `.env` file to load before resolving `${ENV_VAR}`
    /// connector parameters. Defaults to `.env` in the working directory
    /// if present.
    #[arg(long = "env-file", value_name = "FILE")]
    env_file: Option<PathBuf>,

    /// Run the engine and watermark store in persistent mode, rooted at
    /// this directory, instead of the default in-memory/per-process mode.
    #[arg(long = "catalog-dir", value_name = "DIR")]
    catalog_dir: Option<PathBuf>,

    /// Explicit pipeline identity for watermark keys and plan-file
    /// naming. Generated if omitted.
    #[arg(long = "pipeline-id", value_name = "ID")]
    pipeline_id: Option<String>,

    /// Emit logs in JSON format instead of human-readable.
    #[arg(long = "log-json")]
    log_json: bool,

    /// Set log level (overrides `RUST_LOG`/`SQLFLOW_LOG_LEVEL`).
    #[arg(long = "log-level")]
    log_level: Option<String>,
}

/// CLI exit codes (spec.md §6).
const EXIT_SUCCESS: i32 = 0;
const EXIT_VALIDATION_FAILURE: i32 = 1;
const EXIT_EXECUTION_FAILURE: i32 = 2;
const EXIT_CANCELLED: i32 = 3;
const EXIT_INTERNAL_ERROR: i32 = 4;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.log_level.is_some() || cli.log_json {
        sqlflow::log::init_tracing_with(cli.log_level.as_deref(), cli.log_json);
    } else {
        sqlflow::log::init_tracing();
    }

    if let Err(e) = load_dotenv(cli.env_file.as_deref()) {
        warn!("failed to load .env: {e}");
    }

    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let profile = match &cli.profile {
        Some(path) => match Profile::load(path) {
            Ok(p) => p,
            Err(e) => {
                warn!("failed to load profile '{}': {e}", path.display());
                return EXIT_INTERNAL_ERROR;
            }
        },
        None => Profile::default(),
    };

    let cli_vars: HashMap<String, String> = match &cli.vars {
        Some(json) => match parse_param_map(json) {
            Ok(map) => map
                .into_iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
                .collect(),
            Err(e) => {
                warn!("invalid --vars JSON: {e}");
                return EXIT_INTERNAL_ERROR;
            }
        },
        None => HashMap::new(),
    };
    let mut variables = VariableManager::new(cli_vars, profile.variables.clone());

    let source = match std::fs::read_to_string(&cli.pipeline) {
        Ok(s) => s,
        Err(e) => {
            warn!("failed to read '{}': {e}", cli.pipeline.display());
            return EXIT_INTERNAL_ERROR;
        }
    };
    let base_dir = cli.pipeline.parent().unwrap_or_else(|| std::path::Path::new("."));
    let loader = FsIncludeLoader::new(base_dir);

    let pipeline = match resolve(&source, &loader, &mut variables) {
        Ok(p) => p,
        Err(e) => {
            warn!("compilation failed: {e}");
            return EXIT_VALIDATION_FAILURE;
        }
    };

    let mut registry = ConnectorRegistry::new();
    registry.register("CSV", std::sync::Arc::new(CsvConnectorFactory));
    registry.register("REST", std::sync::Arc::new(RestConnectorFactory));

    let outcome = validate(&pipeline, &registry);
    if !outcome.is_valid() {
        warn!("validation failed:\n{}", outcome.report);
        return EXIT_VALIDATION_FAILURE;
    }

    let compiled_plan = match plan(&pipeline) {
        Ok(p) => p,
        Err(e) => {
            warn!("planning failed: {e}");
            return EXIT_VALIDATION_FAILURE;
        }
    };
    info!(operations = compiled_plan.operations.len(), "plan built");

    let pipeline_id = cli.pipeline_id.unwrap_or_else(generate_pipeline_id);

    let engine_mode = match &cli.catalog_dir {
        Some(dir) => EngineMode::Persistent { catalog_dir: dir.clone() },
        None => EngineMode::InMemory,
    };
    let engine = DataFusionEngine::new(engine_mode);

    let owned_watermark: Box<dyn WatermarkStore> = match profile.watermark_path.or_else(|| {
        cli.catalog_dir.as_ref().map(|dir| dir.join("watermarks.json"))
    }) {
        Some(path) => match FileWatermarkStore::open(&path) {
            Ok(store) => Box::new(store),
            Err(e) => {
                warn!("failed to open watermark store '{}': {e}", path.display());
                return EXIT_INTERNAL_ERROR;
            }
        },
        None => Box::new(InMemoryWatermarkStore::new()),
    };

    let cancellation = CancellationToken::new();
    let signal_token = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("cancellation requested; stopping after the current operation");
            signal_token.cancel();
        }
    });

    let executor = Executor::new(
        &engine,
        &registry,
        owned_watermark.as_ref(),
        &outcome,
        pipeline_id,
        cancellation,
    );

    match executor.run(&compiled_plan).await {
        Ok(ExecutionOutcome::Completed(ops)) => {
            info!(operations = ops.len(), "pipeline completed");
            EXIT_SUCCESS
        }
        Ok(ExecutionOutcome::Cancelled { completed, at_operation }) => {
            warn!(completed = completed.len(), at_operation, "pipeline cancelled");
            EXIT_CANCELLED
        }
        Err(sqlflow::SqlFlowError::Cancelled) => {
            warn!("pipeline cancelled");
            EXIT_CANCELLED
        }
        Err(e) => {
            warn!("execution failed: {e}");
            EXIT_EXECUTION_FAILURE
        }
    }
}
