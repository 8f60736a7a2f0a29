//! Command line entry point of the denormalization engine.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use denorm::fixture::{dump_collections, load_fixture_file};
use denorm::store::DocumentStore;
use denorm::store::memory::MemoryStore;
use denorm::store::postgres::PostgresStore;
use denorm::{MergeOutcome, Merger, parse_specs};
use denorm_config::shared::{
    BatchConfig, IndexConfig, JoinStrategy, MergeConfig, StoreConfig, UnresolvedKeyPolicy,
};
use denorm_config::{load_config, load_config_from};
use denorm_telemetry::metrics::init_metrics;
use denorm_telemetry::tracing::init_tracing;
use tracing::{error, info};

const SPEC_HELP: &str = "\
Merge specs:
  <parent_key>[:<target>]

  <target> is `collection[.child_key]` for a one-to-one join, where the value of
  <parent_key> is replaced by the child whose child_key equals it, or
  `[collection[.child_key]]` for a one-to-many join, where <parent_key> receives the
  list of children whose child_key equals the parent `_id`.

  The collection defaults to <parent_key>. The child key defaults to `_id` for
  one-to-one joins and to the parent collection name for one-to-many joins.

Examples:
  denorm people gender                    embed gender documents by `_id`
  denorm orders customer:customers.code   embed customers by their `code`
  denorm owner 'pet:[pet.owner]'          attach the pets of every owner";

/// Embeds child documents into the documents of a parent collection.
#[derive(Parser, Debug)]
#[command(name = "denorm", version, after_help = SPEC_HELP)]
struct Args {
    /// Parent collection receiving the merged documents
    parent: String,

    /// Merge specs, see below
    #[arg(required = true)]
    specs: Vec<String>,

    /// Configuration directory (default: ./configuration when it exists)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Remove the stamps of the given specs instead of merging
    #[arg(long)]
    unstamp: bool,

    /// JSON fixture `{"collection": [documents]}` loaded into the memory store
    #[arg(long)]
    fixture: Option<PathBuf>,

    /// Print every collection of the memory store as JSON after the run
    #[arg(long)]
    dump: bool,

    /// Documents read per store request
    #[arg(long)]
    page_size: Option<usize>,

    /// Parents joined and written per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Largest child collection indexed fully in memory
    #[arg(long)]
    threshold: Option<u64>,

    /// Join strategy
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Fail the run when a foreign key has no matching child
    #[arg(long)]
    abort_on_unresolved: bool,

    /// JSON filter restricting the merged parents, e.g. '{"active": true}'
    #[arg(long)]
    filter: Option<String>,

    /// Field ordering the children of one-to-many joins
    #[arg(long)]
    group_sort_field: Option<String>,

    /// Collection receiving merge stamps
    #[arg(long)]
    stamp_collection: Option<String>,

    /// Serve Prometheus metrics on this port
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    InProcess,
    Aggregation,
}

impl From<StrategyArg> for JoinStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::InProcess => JoinStrategy::InProcess,
            StrategyArg::Aggregation => JoinStrategy::Aggregation,
        }
    }
}

impl Args {
    /// Applies command line overrides on top of the loaded configuration.
    fn apply_overrides(&self, config: &mut MergeConfig) -> anyhow::Result<()> {
        let BatchConfig { page_size, size } = &mut config.batch;
        if let Some(value) = self.page_size {
            *page_size = value;
        }
        if let Some(value) = self.batch_size {
            *size = value;
        }
        if let Some(threshold) = self.threshold {
            config.index = IndexConfig { threshold };
        }
        if let Some(strategy) = self.strategy {
            config.strategy = strategy.into();
        }
        if self.abort_on_unresolved {
            config.unresolved = UnresolvedKeyPolicy::Abort;
        }
        if let Some(filter) = &self.filter {
            config.filter = Some(serde_json::from_str(filter).context("invalid --filter")?);
        }
        if let Some(field) = &self.group_sort_field {
            config.group_sort_field = field.clone();
        }
        if let Some(collection) = &self.stamp_collection {
            config.stamp_collection = collection.clone();
        }

        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = init_tracing() {
        eprintln!("failed to initialize tracing: {err}");
    }

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = load_merge_config(args.config_dir.as_deref())?;
    args.apply_overrides(&mut config)?;

    // Malformed specs fail before any store is touched.
    parse_specs(&args.specs, &args.parent)?;

    if let Some(port) = args.metrics_port {
        init_metrics(port, Some(&args.parent)).context("failed to start metrics exporter")?;
        info!(port, "metrics exporter listening");
    }

    match config.store.clone() {
        StoreConfig::Memory => {
            let store = MemoryStore::new();
            if let Some(path) = &args.fixture {
                let loaded = load_fixture_file(&store, path)
                    .await
                    .with_context(|| format!("failed to load fixture `{}`", path.display()))?;
                info!(documents = loaded, fixture = %path.display(), "fixture loaded");
            }

            execute(store.clone(), config, &args).await?;

            if args.dump {
                let collections = store.collection_names().await;
                let dump = dump_collections(&store, &collections).await;
                println!("{}", serde_json::to_string_pretty(&dump)?);
            }
        }
        StoreConfig::Postgres { connection, schema } => {
            if args.fixture.is_some() || args.dump {
                bail!("--fixture and --dump are only supported with the memory store");
            }

            execute(PostgresStore::new(&connection, schema), config, &args).await?;
        }
    }

    Ok(())
}

async fn execute<S>(store: S, config: MergeConfig, args: &Args) -> anyhow::Result<()>
where
    S: DocumentStore,
{
    let merger = Merger::new(store, config)?;

    if args.unstamp {
        let removed = merger.unstamp(&args.parent, &args.specs).await?;
        println!("removed {removed} merge stamps from `{}`", args.parent);
        return Ok(());
    }

    let started = Instant::now();
    let outcome = merger.merge(&args.parent, &args.specs).await?;
    println!("{}", run_report(&args.parent, &outcome, started.elapsed()));

    Ok(())
}

/// Final report line of a merge run. Skipped runs report zero documents.
fn run_report(parent: &str, outcome: &MergeOutcome, elapsed: Duration) -> String {
    match outcome {
        MergeOutcome::Completed(summary) => throughput(
            summary.documents_processed(),
            summary.elapsed,
            summary.docs_per_sec(),
        ),
        MergeOutcome::AlreadyMerged => format!(
            "`{parent}` is already merged, nothing to do; {}",
            throughput(0, elapsed, 0.0)
        ),
    }
}

fn throughput(documents: u64, elapsed: Duration, docs_per_sec: f64) -> String {
    format!(
        "{documents} documents processed, real {:.3}s, {docs_per_sec:.1} docs/sec",
        elapsed.as_secs_f64()
    )
}

/// Loads the merge configuration, falling back to defaults when `./configuration` is absent.
///
/// An explicit `--config-dir` must exist.
fn load_merge_config(config_dir: Option<&Path>) -> anyhow::Result<MergeConfig> {
    let loaded = match config_dir {
        Some(dir) => load_config_from::<MergeConfig>(dir),
        None => load_config::<MergeConfig>(),
    };

    match loaded {
        Ok(config) => Ok(config),
        Err(err) if err.is_missing_directory() && config_dir.is_none() => {
            info!("no configuration directory, using defaults");
            Ok(MergeConfig::default())
        }
        Err(err) => Err(err).context("failed to load configuration"),
    }
}
