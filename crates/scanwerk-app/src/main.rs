// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk: scan-to-computer client for HP network scanners.
//
// Entry point. Initialises logging, loads the configuration, checks the OCR
// tools, then runs the reconnect supervisor until interrupted.

mod services;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use scanwerk_core::config::AppConfig;
use scanwerk_core::error::Result;
use scanwerk_core::telemetry::{OperationalLog, TracingLog};
use scanwerk_device::{HttpDevice, Supervisor};
use scanwerk_document::{DocumentAssembler, PdfMerger, PipelineWorkerPool, WorkerConfig};
use tokio::sync::watch;
use tracing::{error, info, warn};

use services::data_dir::ConfigSource;
use services::tools;

#[derive(Debug, Parser)]
#[command(name = "scanwerk", version, about = "Scan-to-computer client for HP network scanners")]
struct Cli {
    /// Configuration file (JSON).
    #[arg(env = "SCANWERK_CONFIG")]
    config: Option<PathBuf>,

    /// Device URL, e.g. http://192.168.1.20:8080.
    #[arg(long)]
    printer: Option<String>,

    /// Computer name shown on the device panel.
    #[arg(long)]
    name: Option<String>,

    /// Output name pattern, e.g. ~/Documents/%Y/%Y.%m.%d-%H.%M.%S
    #[arg(short, long)]
    destination: Option<String>,

    /// Debug-level logging when RUST_LOG is not set.
    #[arg(long)]
    trace: bool,

    /// Write the effective configuration to the config file and exit.
    #[arg(long)]
    write_config: bool,
}

impl Cli {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(printer) = &self.printer {
            config.device_url = printer.clone();
        }
        if let Some(name) = &self.name {
            config.computer_name = name.clone();
        }
        if let Some(pattern) = &self.destination {
            config.name_pattern = pattern.clone();
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = if cli.trace { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Scanwerk starting");

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Scanwerk stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let source = ConfigSource::resolve(cli.config.clone());
    let mut config = source.load()?;
    cli.apply(&mut config);
    config.validate()?;

    if cli.write_config {
        config.persist(source.path())?;
        info!(path = %source.path().display(), "configuration written");
        return Ok(());
    }

    let log: Arc<dyn OperationalLog> = Arc::new(TracingLog);
    let pool = tools::check_ocr_tools(&mut config)
        .then(|| PipelineWorkerPool::start(WorkerConfig::from(&config.ocr), Arc::clone(&log)));

    let device = Arc::new(HttpDevice::new(&config.device_url, &config.timing)?);
    let assembler = DocumentAssembler::new(
        PdfMerger::new(config.ocr.concat_tool, config.ocr.step_timeout()),
        Arc::clone(&log),
    )
    .spawn();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, finishing open work");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for interrupts");
                // Dropping the sender would read as a shutdown.
                std::future::pending::<()>().await;
            }
        }
    });

    info!(device = %device.base_url(), computer = %config.computer_name, "connecting");
    let supervisor = Supervisor::new(device, Arc::new(config), pool, assembler.queue(), log);
    let result = supervisor.run(shutdown_rx).await;
    assembler.finish().await;
    result
}
