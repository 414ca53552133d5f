use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::error;

use poets::error::{PoetsError, Result};
use poets::lifecycle::RequestKind;
use poets::{load_config, logging, Config, QueueService};

#[derive(Parser, Debug)]
#[command(name = "poets", version, about = "Two-stage prompt queue backed by SQLite")]
struct CliArgs {
    /// Path to the JSON configuration file.
    #[arg(long, global = true, default_value = "poets.json")]
    config: PathBuf,

    /// Log filter, e.g. `debug` or `poets=trace`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database and fix its journal mode. Run once per file.
    Init,
    /// Add a request to the queue.
    Enqueue {
        #[arg(long, default_value = "text")]
        kind: String,
        /// JSON object stored with the request and passed to media generators.
        #[arg(long, value_parser = parse_json)]
        metadata: Option<serde_json::Value>,
        text: String,
    },
    /// Run one Stage 1 batch.
    Produce,
    /// Run one Stage 2 batch.
    Consume,
    /// Produce then consume under the process lock.
    Run,
    /// Repeat `run` until interrupted.
    Watch {
        /// Seconds between runs. Defaults to `queue.poll_interval_secs`.
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Print a request with its content and artifacts.
    Status { id: i64 },
    /// Validate the configuration and its external dependencies.
    Check,
}

fn parse_json(s: &str) -> std::result::Result<serde_json::Value, String> {
    serde_json::from_str(s).map_err(|e| format!("invalid JSON: {}", e))
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    if let Err(e) = logging::init(args.log_level.as_deref(), args.log_json) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: CliArgs) -> Result<ExitCode> {
    let config: Config = load_config(&args.config)?;

    match args.command {
        Command::Init => {
            let db = QueueService::init(&config)?;
            println!("{} ({})", db.path().display(), db.journal_mode());
        }
        Command::Enqueue {
            kind,
            metadata,
            text,
        } => {
            let service = QueueService::from_config(config)?;
            let id = service.enqueue(&text, RequestKind::from(kind), metadata)?;
            println!("{}", id);
        }
        Command::Produce => {
            let summary = QueueService::from_config(config)?.produce()?;
            print_json(&summary)?;
        }
        Command::Consume => {
            let summary = QueueService::from_config(config)?.consume()?;
            print_json(&summary)?;
        }
        Command::Run => {
            let report = QueueService::from_config(config)?.run_queue()?;
            print_json(&report)?;
        }
        Command::Watch { interval } => {
            let interval =
                Duration::from_secs(interval.unwrap_or(config.queue.poll_interval_secs));
            let service = QueueService::from_config(config)?;

            let stop = Arc::new(AtomicBool::new(false));
            let flag = stop.clone();
            ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)).map_err(|e| {
                PoetsError::InvalidArgument(format!("cannot install Ctrl-C handler: {}", e))
            })?;

            service.watch(interval, &stop)?;
        }
        Command::Status { id } => {
            let service = QueueService::from_config(config)?;
            match service.status(id)? {
                Some(status) => print_json(&status)?,
                None => {
                    eprintln!("request {} not found", id);
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Command::Check => {
            let report = QueueService::check(&config);
            print_json(&report)?;
            if !report.passed() {
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| PoetsError::InvalidArgument(format!("cannot encode output: {}", e)))?;
    println!("{}", json);
    Ok(())
}
