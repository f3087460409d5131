mod config;
mod executors;
mod telemetry;

use clap::{Parser, Subcommand};
use request_context::{ContextBuilder, ContextService};
use shared::http::run_http_service;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ctxd", about = "Serves configured routes through the request context pipeline")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Starts the HTTP server
    Run {
        #[arg(long)]
        config_file_path: PathBuf,
    },
    /// Loads and validates a config file, then exits
    Validate {
        #[arg(long)]
        config_file_path: PathBuf,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
    #[error(transparent)]
    Setup(#[from] request_context::service::SetupError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        CliCommand::Run { config_file_path } => cli_run(config_file_path),
        CliCommand::Validate { config_file_path } => config::Config::from_file(&config_file_path)
            .map(|_| println!("{} is valid", config_file_path.display()))
            .map_err(CliError::from),
    };

    if let Err(e) = result {
        eprintln!("{e}");
        process::exit(1);
    }
}

fn cli_run(config_file_path: PathBuf) -> Result<(), CliError> {
    let config = config::Config::from_file(&config_file_path)?;

    let _sentry = telemetry::init_logging(config.logging.as_ref());
    if let Some(metrics) = &config.metrics {
        telemetry::init_metrics(metrics).map_err(CliError::Metrics)?;
    }

    let server = Arc::new(config.server);
    let service = ContextService::new(ContextBuilder::new(server.clone()), &executors::registry())?;
    tracing::info!(
        routes = server.routes.len(),
        debug = server.debug,
        "Starting ctxd"
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(run_http_service(
        &server.listener.host,
        server.listener.port,
        service,
    ))?;

    Ok(())
}
