// src/lib.rs
//! NVMe SMART telemetry exporter for the Prometheus textfile collector.
//!
//! A [`Poller`] queries each controller through a [`HealthQuery`] backend on a fixed
//! interval and atomically rewrites a `.prom` file that node_exporter picks up.

pub mod collector;
pub mod config;
pub mod error;
pub mod exposition;
pub mod poller;
pub mod publish;

pub use collector::HealthQuery;
pub use config::{Args, Backend, Config};
pub use error::{ExporterError, QueryError, Result};
pub use poller::{CycleReport, Phase, Poller, PollerSettings};

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Startup checks, then the poll loop (or a single cycle with `--once`).
///
/// Returns an error only for unrecoverable startup failures; per-device and publish
/// failures are logged and the loop carries on.
pub async fn serve<Q: HealthQuery>(
    query: Arc<Q>,
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    query.probe().await.map_err(ExporterError::ToolUnavailable)?;
    publish::ensure_output_dir(&config.output_file).await?;

    let mut poller = Poller::new(query, PollerSettings::from(config), config.devices.clone());
    if config.once {
        let report = poller.run_cycle().await;
        info!(
            polled = report.polled.len(),
            failed = report.failed.len(),
            published = report.published,
            "single cycle finished"
        );
        return Ok(());
    }
    poller.run(shutdown).await;
    Ok(())
}
