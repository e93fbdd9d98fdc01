use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use covid19_data::app::{App, FailureKind, RefreshOptions, RefreshOutcome};
use covid19_data::cache::StaleCache;
use covid19_data::config::{ConfigLoader, ResolvedConfig};
use covid19_data::error::DataError;
use covid19_data::fetch::HttpFeedClient;
use covid19_data::output::{HumanOutput, JsonOutput, LogSink, OutputMode, StatusReport, TableStatus};
use covid19_data::reference::ReferenceData;
use covid19_data::storage::{SqliteStorage, TABLES};

#[derive(Parser)]
#[command(name = "covid19-data")]
#[command(about = "Fetch and reconcile COVID-19 case datasets into a local SQLite database")]
#[command(version, author)]
struct Cli {
    /// Config file (default: ./covid19-data.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download stale feeds and rebuild the database")]
    Refresh(RefreshArgs),
    #[command(about = "Show cached feeds and stored tables")]
    Status,
}

#[derive(Args, Clone, Default)]
struct RefreshArgs {
    /// Refetch every feed even when the cached copy is from today
    #[arg(long)]
    force: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<DataError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &DataError) -> u8 {
    match error {
        DataError::ConfigRead(_) | DataError::ConfigParse(_) | DataError::UnknownSource(_) => 2,
        DataError::Reference { .. } => 4,
        DataError::Storage(_) => 5,
        _ => 1,
    }
}

fn outcome_exit_code(outcome: &RefreshOutcome) -> ExitCode {
    match outcome {
        RefreshOutcome::Success { .. } | RefreshOutcome::NoRefreshNeeded { .. } => {
            ExitCode::SUCCESS
        }
        RefreshOutcome::Failed { kind, .. } => ExitCode::from(match kind {
            FailureKind::InvalidUrl
            | FailureKind::ConnectionFailure
            | FailureKind::Timeout
            | FailureKind::UnknownTransport => 3,
            FailureKind::InvalidData => 4,
            FailureKind::Storage => 5,
            FailureKind::Cache | FailureKind::RefreshInProgress | FailureKind::Internal => 1,
        }),
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Refresh(RefreshArgs::default())) {
        Commands::Refresh(args) => run_refresh(args, config, output_mode),
        Commands::Status => run_status(config, output_mode),
    }
}

fn run_refresh(
    args: RefreshArgs,
    config: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<ExitCode> {
    let references = ReferenceData::load(&config.state_codes, &config.population)?;
    let client = HttpFeedClient::new(config.timeout)?;
    let storage = SqliteStorage::open(config.database.clone()).map_err(DataError::from)?;
    let app = Arc::new(App::new(
        config.registry,
        StaleCache::new(config.data_dir),
        references,
        client,
        storage,
    ));

    let task = app.spawn_refresh(RefreshOptions { force: args.force }, LogSink)?;
    let outcome = task.wait();
    match output_mode {
        OutputMode::Json => JsonOutput::print_outcome(&outcome).into_diagnostic()?,
        OutputMode::Human => HumanOutput::print_outcome(&outcome).into_diagnostic()?,
    }
    Ok(outcome_exit_code(&outcome))
}

fn run_status(config: ResolvedConfig, output_mode: OutputMode) -> miette::Result<ExitCode> {
    let cache = StaleCache::new(config.data_dir);
    let storage = SqliteStorage::open(config.database).map_err(DataError::from)?;
    let mut tables = Vec::new();
    for table in TABLES {
        tables.push(TableStatus {
            table: table.to_string(),
            rows: storage.row_count(table).map_err(DataError::from)?,
        });
    }
    let report = StatusReport {
        feeds: cache.entries(config.registry.sources()),
        tables,
    };
    match output_mode {
        OutputMode::Json => JsonOutput::print_status(&report).into_diagnostic()?,
        OutputMode::Human => HumanOutput::print_status(&report).into_diagnostic()?,
    }
    Ok(ExitCode::SUCCESS)
}
