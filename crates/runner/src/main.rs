//! Sluice runner - runs and tests the import jobs of this installation
//!
//! Trailing arguments are job arguments (`date=2016-03-01`, `files[]=a.csv`,
//! `flag?=True`) or facility overrides (`--Logger.level=debug`).

mod catalog;
mod logging;
mod paths;
mod report;

use std::panic::AssertUnwindSafe;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use sluice_core::application::{execute_guarded, PanicGuardResult};
use sluice_core::domain::CommandLine;
use sluice_core::facilities::RunHistory;
use sluice_core::port::{InMemoryPushTransport, RunHistoryRepository, SystemTimeProvider, UuidProvider};
use sluice_core::{register_default_facilities, register_facility, AppConfig, Catalog, FacilityAdapters, Launcher};
use sluice_infra_sqlite::{SqliteRunHistory, TemporaryDb};
use sluice_infra_system::SysinfoProbe;
use tabled::{Table, Tabled};
use tracing::info;

use crate::report::{print_outcome, StdoutReportSink, TestOutcome};

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Run recurring data imports", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "SLUICE_CONFIG")]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an importer against production resources
    Run {
        /// Importer name, e.g. partners::daily_accounts
        importer: String,

        /// Job arguments and facility overrides
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Run importers in test mode (auto-mocks on, reports printed)
    Test {
        /// Importer name
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        importer: Option<String>,

        /// Test every importer of the catalog
        #[arg(long)]
        all: bool,

        /// Job arguments and facility overrides
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// List the known importers
    List,

    /// Show the last recorded runs of an importer
    History {
        /// Importer name
        importer: String,

        /// Number of runs to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
}

#[derive(Tabled)]
struct ImporterRow {
    name: String,
    uuid: String,
}

#[derive(Tabled)]
struct RunRow {
    run_id: String,
    state: String,
    test: bool,
    started: String,
    duration_ms: String,
    errors: i64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init_logging()?;

    let config_file = paths::config_file(cli.config.as_deref());
    let config = AppConfig::load(config_file.as_deref())
        .with_context(|| format!("Failed to load configuration from {:?}", config_file))?;
    info!(environment = %config.environment, file = ?config_file, "Configuration loaded");

    let catalog = catalog::build_catalog()?;

    match cli.command {
        Commands::Run { importer, args } => {
            install_facilities(&config)?;
            let command_line = CommandLine::parse(&args)?;
            let importer = catalog.get(&importer)?;
            let result = launcher().run(importer, command_line.kwargs, &command_line.overrides);
            print_outcome(importer.name(), &result);
            result?;
        }

        Commands::Test {
            importer,
            all,
            args,
        } => {
            install_facilities(&config)?;
            let command_line = CommandLine::parse(&args)?;
            if all {
                test_all(&catalog, &command_line)?;
            } else if let Some(name) = importer {
                let importer = catalog.get(&name)?;
                let result =
                    launcher().test(importer, command_line.kwargs, &command_line.overrides);
                print_outcome(importer.name(), &result);
                result?;
            }
        }

        Commands::List => {
            let rows: Vec<ImporterRow> = catalog
                .list()
                .into_iter()
                .map(|(name, uuid)| ImporterRow {
                    name,
                    uuid: uuid.to_string(),
                })
                .collect();
            println!("{}", Table::new(rows));
        }

        Commands::History { importer, limit } => {
            let url = paths::history_url(config.run_history.path.as_deref())?;
            let repository = SqliteRunHistory::open(&url)
                .with_context(|| format!("Failed to open run history at {}", url))?;
            let runs = repository.recent(&importer, limit)?;
            if runs.is_empty() {
                println!("{}", format!("No runs recorded for {}", importer).yellow());
                return Ok(());
            }
            let rows: Vec<RunRow> = runs
                .into_iter()
                .map(|run| RunRow {
                    duration_ms: run.duration_ms().map(|d| d.to_string()).unwrap_or_default(),
                    started: chrono::DateTime::from_timestamp_millis(run.started_at)
                        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_default(),
                    run_id: run.run_id,
                    state: run.state.to_string(),
                    test: run.test,
                    errors: run.error_count,
                })
                .collect();
            println!("{}", format!("Recent runs of {}", importer).cyan().bold());
            println!("{}", Table::new(rows));
        }
    }

    Ok(())
}

fn launcher() -> Launcher {
    Launcher::new().with_report_sink(Rc::new(StdoutReportSink))
}

/// Default facilities, the opt-in ones the config asks for, and the
/// test-mode substitutions of every adapter crate
fn install_facilities(config: &AppConfig) -> Result<()> {
    let config = Rc::new(config.clone());
    register_default_facilities(
        Rc::clone(&config),
        FacilityAdapters {
            probe: Arc::new(SysinfoProbe::new()),
            push_transport: Arc::new(InMemoryPushTransport::default()),
        },
    );
    register_facility("temporary_db", || Box::new(TemporaryDb::new()));

    if config.run_history.enabled {
        let url = paths::history_url(config.run_history.path.as_deref())?;
        let repository: Arc<dyn RunHistoryRepository> = Arc::new(
            SqliteRunHistory::open(&url)
                .with_context(|| format!("Failed to open run history at {}", url))?,
        );
        let record_tests = config.run_history.record_tests;
        info!(url = %url, record_tests, "Run history enabled");
        register_facility("run_history", move || {
            Box::new(
                RunHistory::new(
                    Arc::clone(&repository),
                    Arc::new(SystemTimeProvider),
                    Arc::new(UuidProvider),
                )
                .recording_tests(record_tests),
            )
        });
    }

    sluice_infra_files::register_auto_mocks();
    sluice_infra_sqlite::register_auto_mocks();
    Ok(())
}

/// Test every importer; one panicking or failing importer does not stop the rest
fn test_all(catalog: &Catalog, command_line: &CommandLine) -> Result<()> {
    let launcher = launcher();
    let mut outcomes = Vec::with_capacity(catalog.len());

    for importer in catalog.iter() {
        let guarded = execute_guarded(AssertUnwindSafe(|| {
            launcher.test(importer, command_line.kwargs.clone(), &command_line.overrides)
        }));
        let outcome = match guarded {
            PanicGuardResult::Success(result) => TestOutcome::from_result(importer.name(), &result),
            PanicGuardResult::Panicked(message) => {
                TestOutcome::failed(importer.name(), format!("panicked: {}", message))
            }
        };
        outcomes.push(outcome);
    }

    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    println!();
    println!("{}", Table::new(&outcomes));
    if failed == 0 {
        println!("{}", format!("✓ {} importers passed", outcomes.len()).green().bold());
        Ok(())
    } else {
        println!("{}", format!("✗ {} of {} importers failed", failed, outcomes.len()).red().bold());
        std::process::exit(1);
    }
}
