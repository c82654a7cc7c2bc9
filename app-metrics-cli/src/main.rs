mod cli;
mod config;
mod error;
mod output;

use std::process;
use std::sync::Arc;

use app_metrics_engine::{Collector, HttpTransport};
use clap::Parser;
#[cfg(feature = "colored-output")]
use colored::*;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::{
    cli::Args,
    config::{AppConfig, load_descriptor},
    error::{AppError, Result},
    output::OutputManager,
};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let json_errors = args.output_format().is_some_and(|format| format.is_json());

    if let Err(e) = run(args).await {
        if json_errors {
            let error_json = serde_json::json!({
                "status": "error",
                "message": e.to_string(),
            });
            // A cancelled run already printed its partial batch on stdout.
            if e.printed_partial_batch() {
                eprintln!("{error_json}");
            } else {
                println!("{error_json}");
            }
        } else {
            error!("Application error: {}", e);
            #[cfg(feature = "colored-output")]
            {
                eprintln!("{} {}", "Error:".red().bold(), e);
            }
            #[cfg(not(feature = "colored-output"))]
            {
                eprintln!("Error: {}", e);
            }
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet)?;

    let mut config = AppConfig::load(args.config.as_deref())?;
    config.apply_args(&args);
    debug!(
        format = ?config.format,
        path = %config.metrics_path,
        output = ?config.output,
        "Effective configuration"
    );

    let descriptor = load_descriptor(&args.descriptor)?;
    let transport = Arc::new(HttpTransport::new(&config.transport_config())?);
    let normalizer = config.format.build(config.exclude.iter().cloned());
    let collector = Collector::new(
        &descriptor,
        normalizer,
        config.collector_config().with_transport(transport),
    )?;

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));
    let result = match config.deadline() {
        Some(deadline) => collector.collect_with_deadline(&cancel, deadline).await,
        None => collector.collect(&cancel).await,
    };
    watcher.abort();

    let output = OutputManager::new(config.colored);
    match result {
        Ok(batch) => {
            println!("{}", output.render(&batch, config.output)?);
            Ok(())
        }
        Err(e) if e.is_cancellation() => {
            let message = e.to_string();
            println!("{}", output.render(e.partial(), config.output)?);
            warn!("{message}");
            Err(AppError::Collect(e))
        }
        Err(e) => Err(e.into()),
    }
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupted, cancelling metrics collection");
        cancel.cancel();
    }
}

fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(verbose),
        )
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))
}
