pub mod commands;

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use shelfsync_core::config::{AppConfig, LoadOptions, LogFormat};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "shelfsync",
    about = "Durable sheets-to-storefront sync",
    long_about = "Run the sheets-to-storefront sync workflow on a durable event log: start workers, start, cancel or resume executions, and inspect their history.",
    after_help = "Examples:\n  shelfsync migrate\n  shelfsync run\n  shelfsync start --id nightly-sync --wait\n  shelfsync history nightly-sync"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run an embedded worker, start one sync and wait for its report")]
    Run {
        #[arg(long, help = "Workflow id (defaults to sheets-to-shopify-demo-<uuid>)")]
        id: Option<String>,
    },
    #[command(about = "Poll the configured task queue until Ctrl-C")]
    Worker,
    #[command(about = "Start a sync execution on the configured task queue")]
    Start(StartCommand),
    #[command(about = "Request cancellation of a running execution")]
    Cancel {
        workflow_id: String,
        #[arg(long, default_value = "canceled by operator")]
        reason: String,
    },
    #[command(about = "Enqueue a repair workflow task for a stalled execution")]
    Resume { workflow_id: String },
    #[command(about = "Print the recorded event history of an execution")]
    History { workflow_id: String },
    #[command(about = "List recent executions, newest first")]
    List {
        #[arg(long, help = "Only executions in this status")]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
}

#[derive(Debug, Args)]
struct StartCommand {
    #[arg(long, help = "Workflow id (defaults to sheets-to-shopify-demo-<uuid>)")]
    id: Option<String>,
    #[arg(long, help = "Block until the execution closes and print its report")]
    wait: bool,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    // An unloadable config is reported by the command itself; log with defaults meanwhile.
    let config = AppConfig::load(LoadOptions::default()).unwrap_or_default();
    if let Err(error) = init_logging(&config) {
        eprintln!("logging disabled: {error:#}");
    }

    let result = match cli.command {
        Command::Run { id } => commands::run::run(id),
        Command::Worker => commands::worker::run(),
        Command::Start(start) => commands::start::run(commands::start::StartArgs {
            workflow_id: start.id,
            wait: start.wait,
        }),
        Command::Cancel { workflow_id, reason } => commands::cancel::run(&workflow_id, &reason),
        Command::Resume { workflow_id } => commands::resume::run(&workflow_id),
        Command::History { workflow_id } => commands::history::run(&workflow_id),
        Command::List { status, limit } => commands::list::run(status.as_deref(), limit),
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so stdout carries only the command payload.
pub fn init_logging(config: &AppConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&config.logging.level)
        .with_context(|| format!("invalid logging.level `{}`", config.logging.level))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let installed = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|error| anyhow!("failed to install tracing subscriber: {error}"))
}
