use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storplace_core::security::SYSTEM_SUBJECT;
use storplace_core::{
    parse_size_kib, AccessContext, AccessPolicy, AllowAll, ClusterSnapshot, ResourceName,
    StaticAcl, StorPoolName,
};
use storplace_scheduler::{
    Autoplacer, AutoplacerConfig, ConstraintSet, Placement, PropertyFilter, ScoreStrategy,
};
use storplace_storage::RegistryStore;
use tracing::{error, info, warn};

/// Exit code when no feasible placement exists
const EXIT_INFEASIBLE: i32 = 2;

#[derive(Parser)]
#[command(name = "storplace", about = "Storplace replica autoplacer")]
struct Cli {
    /// Log output format
    #[arg(
        long,
        global = true,
        value_enum,
        default_value = "text",
        env = "STORPLACE_LOG_FORMAT"
    )]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a cluster snapshot file and store it in the registry
    Import {
        /// Path to the redb database file
        #[arg(long, env = "STORPLACE_DATA_DIR", default_value = "./storplace.redb")]
        data_dir: PathBuf,
        /// Snapshot file (JSON or YAML)
        file: PathBuf,
    },
    /// Choose storage pools for the replicas of one resource
    Place {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        placer: PlacerArgs,
        /// Resource to place
        #[arg(long)]
        resource: String,
        #[command(flatten)]
        constraints: ConstraintArgs,
        /// Output format of the placement
        #[arg(long, value_enum, default_value = "yaml")]
        output: OutputFormat,
    },
    /// Run independent placement requests concurrently against one snapshot
    Batch {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        placer: PlacerArgs,
        /// YAML list of `{resource, constraints}` requests
        requests: PathBuf,
        /// Output format of the results
        #[arg(long, value_enum, default_value = "yaml")]
        output: OutputFormat,
    },
}

/// Where the cluster state is read from
#[derive(Args)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    /// Path to the redb database file
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Snapshot file (JSON or YAML) used instead of the registry
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

#[derive(Args)]
struct PlacerArgs {
    /// Autoplacer configuration file (JSON or YAML)
    #[arg(long, env = "STORPLACE_CONFIG")]
    config: Option<PathBuf>,
    /// Scoring strategy (most-free-space, least-used, uniform)
    #[arg(long)]
    strategy: Option<ScoreStrategy>,
    /// Log every sorted candidate before the search
    #[arg(long)]
    log_candidates: bool,
    /// Access control list (JSON or YAML) checked for `--subject`; without one every subject has full access
    #[arg(long, env = "STORPLACE_ACL")]
    acl: Option<PathBuf>,
    /// Subject the placement runs as
    #[arg(long, env = "STORPLACE_SUBJECT", default_value = SYSTEM_SUBJECT)]
    subject: String,
}

#[derive(Args)]
struct ConstraintArgs {
    /// Number of replicas to place
    #[arg(long, default_value_t = 2)]
    replicas: usize,
    /// Only use storage pools with this name
    #[arg(long)]
    storage_pool: Option<String>,
    /// Node property all replicas share, as `key` or `key=value` (repeatable)
    #[arg(long)]
    replicas_on_same: Vec<String>,
    /// Node property all replicas differ on, as `key` or `key=value` (repeatable)
    #[arg(long)]
    replicas_on_different: Vec<String>,
    /// Do not place next to this resource (repeatable)
    #[arg(long)]
    not_place_with: Vec<String>,
    /// Do not place next to resources matching this pattern
    #[arg(long)]
    not_place_with_regex: Option<String>,
    /// Ignore nodes already hosting the resource
    #[arg(long)]
    skip_already_placed: bool,
    /// Required free space per pool, in KiB or with a Ki/Mi/Gi/Ti suffix
    #[arg(long, default_value = "0", value_parser = parse_size)]
    size_kib: u64,
}

fn parse_size(s: &str) -> Result<u64, String> {
    parse_size_kib(s).map_err(|e| e.to_string())
}

impl SourceArgs {
    fn load(&self) -> miette::Result<ClusterSnapshot> {
        match (&self.data_dir, &self.snapshot) {
            (Some(data_dir), _) => Ok(open_registry(data_dir)?.load_snapshot()?),
            (None, Some(file)) => Ok(ClusterSnapshot::from_file(file)?),
            (None, None) => Err(miette::miette!(
                "Either --data-dir or --snapshot is required"
            )),
        }
    }
}

impl PlacerArgs {
    /// Load the configuration file, then apply the flags on top
    fn config(&self) -> miette::Result<AutoplacerConfig> {
        let mut config = match &self.config {
            Some(path) => AutoplacerConfig::from_file(path)?,
            None => AutoplacerConfig::default(),
        };
        if let Some(strategy) = self.strategy {
            config.strategy = strategy;
        }
        if self.log_candidates {
            config.log_candidates = true;
        }
        Ok(config)
    }

    fn autoplacer(&self) -> miette::Result<Autoplacer> {
        let policy: Arc<dyn AccessPolicy> = match &self.acl {
            Some(path) => {
                info!("Checking access against {}", path.display());
                Arc::new(StaticAcl::from_file(path)?)
            }
            None => Arc::new(AllowAll),
        };
        Ok(Autoplacer::new(policy, self.config()?))
    }

    fn access(&self) -> AccessContext {
        AccessContext::new(self.subject.as_str())
    }
}

impl ConstraintArgs {
    fn to_constraints(&self) -> miette::Result<ConstraintSet> {
        let mut constraints = ConstraintSet::new(self.replicas)
            .with_skip_already_placed(self.skip_already_placed)
            .with_size_kib(self.size_kib);

        if let Some(pool) = &self.storage_pool {
            constraints = constraints.with_storage_pool(StorPoolName::new(pool.as_str())?);
        }
        for expr in &self.replicas_on_same {
            constraints = constraints.with_replicas_on_same(expr.parse::<PropertyFilter>()?);
        }
        for expr in &self.replicas_on_different {
            constraints = constraints.with_replicas_on_different(expr.parse::<PropertyFilter>()?);
        }
        for name in &self.not_place_with {
            constraints = constraints.with_not_place_with(ResourceName::new(name.as_str())?);
        }
        if let Some(pattern) = &self.not_place_with_regex {
            constraints = constraints.with_not_place_with_regex(pattern.as_str());
        }
        Ok(constraints)
    }
}

/// One entry of a batch request file
#[derive(Debug, Deserialize)]
struct PlacementRequest {
    resource: ResourceName,
    #[serde(default)]
    constraints: ConstraintSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum PlacementStatus {
    Placed,
    Infeasible,
    Failed,
}

#[derive(Debug, Serialize)]
struct PlacementOutcome {
    resource: ResourceName,
    status: PlacementStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    placement: Option<Placement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let placed = match cli.command {
        Commands::Import { data_dir, file } => {
            run_import(&data_dir, &file)?;
            true
        }
        Commands::Place {
            source,
            placer,
            resource,
            constraints,
            output,
        } => run_place(&source, &placer, &resource, &constraints, output)?,
        Commands::Batch {
            source,
            placer,
            requests,
            output,
        } => run_batch(&source, &placer, &requests, output).await?,
    };

    if !placed {
        std::process::exit(EXIT_INFEASIBLE);
    }
    Ok(())
}

/// Logs go to stderr so stdout only carries the rendered result
fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

fn open_registry(data_dir: &Path) -> miette::Result<RegistryStore> {
    RegistryStore::open(data_dir).map_err(|e| {
        miette::miette!(
            "Failed to open registry at '{}': {}",
            data_dir.display(),
            e
        )
    })
}

fn render<T: Serialize>(value: &T, output: OutputFormat) -> miette::Result<String> {
    let text = match output {
        OutputFormat::Yaml => storplace_core::to_yaml(value)?,
        OutputFormat::Json => storplace_core::to_json_pretty(value)?,
    };
    Ok(text)
}

/// Validate a snapshot file and replace the registry content with it
fn run_import(data_dir: &Path, file: &Path) -> miette::Result<()> {
    let snapshot = ClusterSnapshot::from_file(file)?;
    let registry = open_registry(data_dir)?;
    registry.save_snapshot(&snapshot)?;

    info!(
        "Imported {} nodes from '{}' into '{}'",
        snapshot.nodes().count(),
        file.display(),
        data_dir.display()
    );
    Ok(())
}

/// Run one placement; returns whether a placement was found
fn run_place(
    source: &SourceArgs,
    placer: &PlacerArgs,
    resource: &str,
    constraints: &ConstraintArgs,
    output: OutputFormat,
) -> miette::Result<bool> {
    let resource = ResourceName::new(resource)?;
    let constraints = constraints.to_constraints()?;
    let autoplacer = placer.autoplacer()?;
    let access = placer.access();

    let placement = match &source.data_dir {
        Some(data_dir) => {
            let registry = open_registry(data_dir)?;
            autoplacer.place_from_registry(&registry, &access, &resource, &constraints)?
        }
        None => {
            let snapshot = source.load()?;
            autoplacer.place(&snapshot, &access, &resource, &constraints)?
        }
    };

    match placement {
        Some(placement) => {
            println!("{}", render(&placement, output)?.trim_end());
            Ok(true)
        }
        None => {
            eprintln!(
                "No feasible placement of {} replicas for resource '{}'",
                constraints.replica_count, resource
            );
            Ok(false)
        }
    }
}

/// Run every request of a batch file; returns whether all of them were placed
async fn run_batch(
    source: &SourceArgs,
    placer: &PlacerArgs,
    requests: &Path,
    output: OutputFormat,
) -> miette::Result<bool> {
    let content = std::fs::read_to_string(requests).map_err(|e| {
        miette::miette!("Failed to read requests '{}': {}", requests.display(), e)
    })?;
    let requests: Vec<PlacementRequest> = storplace_core::from_yaml(&content)?;

    let snapshot = Arc::new(source.load()?);
    let autoplacer = Arc::new(placer.autoplacer()?);
    let outcomes = place_all(snapshot, autoplacer, placer.access(), requests).await?;

    println!("{}", render(&outcomes, output)?.trim_end());
    Ok(outcomes
        .iter()
        .all(|outcome| outcome.status == PlacementStatus::Placed))
}

/// One blocking task per request, all sharing the same snapshot
async fn place_all(
    snapshot: Arc<ClusterSnapshot>,
    autoplacer: Arc<Autoplacer>,
    access: AccessContext,
    requests: Vec<PlacementRequest>,
) -> miette::Result<Vec<PlacementOutcome>> {
    info!("Running {} placement requests", requests.len());

    let handles: Vec<_> = requests
        .into_iter()
        .map(|request| {
            let snapshot = snapshot.clone();
            let autoplacer = autoplacer.clone();
            let access = access.clone();
            tokio::task::spawn_blocking(move || {
                let result =
                    autoplacer.place(&snapshot, &access, &request.resource, &request.constraints);
                (request.resource, result)
            })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        let (resource, result) = handle
            .await
            .map_err(|e| miette::miette!("Placement task failed: {}", e))?;

        let outcome = match result {
            Ok(Some(placement)) => PlacementOutcome {
                resource,
                status: PlacementStatus::Placed,
                placement: Some(placement),
                error: None,
            },
            Ok(None) => PlacementOutcome {
                resource,
                status: PlacementStatus::Infeasible,
                placement: None,
                error: None,
            },
            Err(e) => {
                error!("Placement of resource '{}' failed: {}", resource, e);
                PlacementOutcome {
                    resource,
                    status: PlacementStatus::Failed,
                    placement: None,
                    error: Some(e.to_string()),
                }
            }
        };
        outcomes.push(outcome);
    }

    let failed = outcomes
        .iter()
        .filter(|outcome| outcome.status != PlacementStatus::Placed)
        .count();
    if failed > 0 {
        warn!("{} of {} requests were not placed", failed, outcomes.len());
    }
    Ok(outcomes)
}
