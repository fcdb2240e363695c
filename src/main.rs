// src/main.rs
use crate::config::{AppConfig, CliArgs};
use crate::connectors::paper::PaperBroker;
use crate::core::engine::HedgeEngine;
use clap::error::ErrorKind;
use clap::Parser;
use dotenvy::dotenv;
use std::process::ExitCode;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

mod config;
mod connectors;
mod core;
mod error;
mod types;
mod utils;

/// Process status for malformed arguments (-1).
const ARGUMENT_ERROR: u8 = 255;

fn init_tracing(log_dir: &str) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, "delta_hedger.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();

    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();

    // 1. Arguments and configuration, before any broker interaction
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(ARGUMENT_ERROR);
        }
    };

    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return ExitCode::from(ARGUMENT_ERROR);
        }
    };

    let _log_guard = init_tracing(&config.log_dir);

    println!("========================================");
    println!("       DELTA HEDGER - v{}", env!("CARGO_PKG_VERSION"));
    println!("========================================");
    println!("Account:    {}", config.account);
    println!(
        "Mode:       {}",
        if config.continuous {
            "CONTINUOUS"
        } else {
            "SINGLE CYCLE"
        }
    );
    println!("Max shares: {}", config.max_shares);
    println!("Min change: {}", config.min_share_change);
    println!("========================================");

    // 2. Broker session
    if config.paper.positions.is_empty() {
        warn!("Paper portfolio is empty, nothing will be hedged");
    }
    let broker = PaperBroker::new(config.paper.clone());

    // 3. Ctrl+C ends continuous hedging after the running cycle
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, finishing current cycle");
            let _ = shutdown_tx.send(true);
        }
    });

    // 4. Run
    let mut engine = HedgeEngine::new(config, Box::new(broker)).with_shutdown(shutdown_rx);

    match engine.run().await {
        Ok(report) if report.failed() => {
            warn!(
                request_errors = report.status.request_errors,
                "Run finished with request errors"
            );
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal hedging error: {}", e);
            ExitCode::FAILURE
        }
    }
}
