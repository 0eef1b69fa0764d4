//! # cqlbulk - Bulk Transfer CLI
//!
//! Thin executable around the workflow engine: parses the subcommand,
//! loads the YAML settings document, applies `-s key=value` overrides,
//! runs the workflow under a cancellation token wired to Ctrl-C, and maps
//! the outcome onto the documented exit codes:
//!
//! - `0` success
//! - `1` completed with non-fatal errors
//! - `2` aborted by the error ceiling
//! - `3` aborted by a fatal error
//! - `4` interrupted
//! - `5` crashed
//!
//! ## Usage
//!
//! ```bash
//! # Load a CSV into a table
//! cqlbulk load -f settings.yml -s schema.keyspace=ks -s schema.table=t
//!
//! # Dry-run: full pipeline, no driver dispatch
//! cqlbulk load -f settings.yml --dry-run
//!
//! # Count rows
//! cqlbulk count -f settings.yml
//! ```
//!
//! Connector and driver implementations live in their own crates and are
//! resolved by name in [`build_connector`] / [`build_session`].

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use cqlbulk_core::{BulkError, BulkSettings, Connector, DriverSession};
use cqlbulk_engine::{Workflow, WorkflowReport};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "cqlbulk", version)]
#[command(about = "Bulk loader/unloader for CQL wide-column databases")]
struct Cli {
    /// Settings YAML document.
    #[arg(short = 'f', long, global = true)]
    settings_file: Option<PathBuf>,

    /// Dotted-key overrides applied on top of the settings file, e.g.
    /// `-s executor.max-requests-per-second=500`.
    #[arg(short = 's', long = "set", global = true, value_parser = parse_override)]
    overrides: Vec<(String, String)>,

    /// Run the whole pipeline but skip driver dispatch.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// External records into the database.
    Load,
    /// Database rows into external records.
    Unload,
    /// Aggregate row counts.
    Count,
}

fn parse_override(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .ok_or_else(|| format!("override '{raw}' is not key=value"))
}

/// Resolve the configured connector implementation. Connector crates
/// (delimited text, line-delimited JSON, URL streams) register here when
/// linked into the build.
fn build_connector(settings: &BulkSettings) -> Result<Box<dyn Connector>, BulkError> {
    Err(BulkError::Config(format!(
        "no connector implementation is linked for '{}'",
        settings.connector.name
    )))
}

/// Resolve the wire-level driver session for the configured contact
/// points. The driver crate registers here when linked into the build.
fn build_session(settings: &BulkSettings) -> Result<Arc<dyn DriverSession>, BulkError> {
    Err(BulkError::Config(format!(
        "no driver implementation is linked for contact points {:?}",
        settings.driver.contact_points
    )))
}

fn summarize(report: &WorkflowReport) {
    match report.status {
        cqlbulk_engine::WorkflowStatus::Interrupted => {
            eprintln!("Operation {} interrupted.", report.operation);
        }
        _ => {
            println!(
                "Operation {}: {:?}. Records: {}, errors: {}, rows: {}.",
                report.operation, report.status, report.records, report.errors, report.rows
            );
            if let Some(failure) = &report.failure {
                eprintln!("{failure}");
            }
            if let Some(dir) = &report.execution_dir {
                println!("Execution logs: {}", dir.display());
            }
        }
    }
}

async fn run(cli: Cli) -> i32 {
    let yaml = match &cli.settings_file {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                eprintln!("cannot read settings file {}: {e}", path.display());
                return 3;
            }
        },
        None => String::new(),
    };
    let mut overrides = cli.overrides.clone();
    if cli.dry_run {
        overrides.push(("engine.dry-run".into(), "true".into()));
    }
    let settings = match BulkSettings::load(&yaml, &overrides) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{e}");
            return 3;
        }
    };

    let session = match build_session(&settings) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{e}");
            return 3;
        }
    };
    let workflow = match cli.command {
        Command::Load | Command::Unload => {
            let connector = match build_connector(&settings) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("{e}");
                    return 3;
                }
            };
            match cli.command {
                Command::Load => Workflow::load(settings, connector, session),
                _ => Workflow::unload(settings, connector, session),
            }
        }
        Command::Count => Workflow::count(settings, session),
    };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling");
            signal_cancel.cancel();
        }
    });

    let report = workflow.execute(cancel).await;
    workflow.close().await;
    summarize(&report);
    report.exit_code()
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let code = run(cli).await;
    std::process::exit(code);
}
