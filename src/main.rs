// src/main.rs
use clap::Parser;
use nvme_exporter::collector::{IoctlQuery, NvmeCli};
use nvme_exporter::{Args, Backend, Config, serve};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal");
            ExitCode::FAILURE
        }
    }
}

/// RUST_LOG wins over --log-level when both are set.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::resolve(&args)?;
    info!(
        backend = ?config.backend,
        output = %config.output_file.display(),
        interval = ?config.interval,
        devices = ?config.devices,
        "starting nvme-exporter"
    );

    let (tx, rx) = watch::channel(false);
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
        let _ = tx.send(true);
    });

    match config.backend {
        Backend::Cli => serve(Arc::new(NvmeCli::new(&config.nvme_cli)), &config, rx).await?,
        Backend::Ioctl => serve(Arc::new(IoctlQuery::default()), &config, rx).await?,
    }
    Ok(())
}
