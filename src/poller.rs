// src/poller.rs
//! The poll → render → publish loop.

use crate::collector::diskstats::{parse_in_flight, read_diskstats};
use crate::collector::query::HealthQuery;
use crate::collector::record::{DeviceInfo, DeviceRecord, Snapshot};
use crate::config::{Config, dedup_devices};
use crate::error::{QueryError, Result};
use crate::exposition;
use crate::publish::publish;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, error, info, warn};

/// Where the poller is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Polling,
    Publishing,
}

/// Settings the poller needs, split out of [`Config`] so tests can build them directly.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub interval: Duration,
    pub query_timeout: Duration,
    pub output_file: PathBuf,
    /// `None` disables the in-flight I/O metric.
    pub diskstats_path: Option<PathBuf>,
}

impl From<&Config> for PollerSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            interval: cfg.interval,
            query_timeout: cfg.query_timeout,
            output_file: cfg.output_file.clone(),
            diskstats_path: Some(cfg.diskstats_path.clone()),
        }
    }
}

/// What one cycle achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub polled: Vec<String>,
    pub failed: Vec<String>,
    pub published: bool,
}

/// Outcome of querying one device within a cycle.
struct DeviceResult {
    device: String,
    health: Result<Snapshot, QueryError>,
    identity: Option<Result<DeviceInfo, QueryError>>,
}

pub struct Poller<Q> {
    query: Arc<Q>,
    settings: PollerSettings,
    /// Device list; frozen once non-empty so series never churn.
    devices: Vec<String>,
    records: BTreeMap<String, DeviceRecord>,
    phase: Phase,
}

impl<Q: HealthQuery> Poller<Q> {
    /// `devices` is the configured list; pass an empty list to discover at runtime.
    pub fn new(query: Arc<Q>, settings: PollerSettings, devices: Vec<String>) -> Self {
        let devices = dedup_devices(devices);
        let records = devices
            .iter()
            .map(|d| (d.clone(), DeviceRecord::new(d.as_str())))
            .collect();
        Self {
            query,
            settings,
            devices,
            records,
            phase: Phase::Idle,
        }
    }

    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    pub fn record(&self, device: &str) -> Option<&DeviceRecord> {
        self.records.get(device)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Fill the device list from the backend if it is still empty.
    ///
    /// Zero devices is not fatal; discovery runs again on the next cycle.
    pub async fn discover(&mut self) {
        if !self.devices.is_empty() {
            return;
        }
        let found = match timeout(self.settings.query_timeout, self.query.discover()).await {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                warn!(error = %e, "device discovery failed");
                return;
            }
            Err(_) => {
                warn!(timeout = ?self.settings.query_timeout, "device discovery timed out");
                return;
            }
        };
        self.devices = dedup_devices(found);
        if self.devices.is_empty() {
            warn!("no NVMe devices found, retrying next cycle");
            return;
        }
        info!(devices = ?self.devices, "discovered NVMe devices");
        for device in &self.devices {
            self.records
                .entry(device.clone())
                .or_insert_with(|| DeviceRecord::new(device.as_str()));
        }
    }

    /// Query every device concurrently; each query is bounded by the timeout.
    async fn query_all(&self) -> Vec<DeviceResult> {
        let mut set = JoinSet::new();
        for device in &self.devices {
            let query = Arc::clone(&self.query);
            let device = device.clone();
            let limit = self.settings.query_timeout;
            let need_identity = self
                .records
                .get(&device)
                .is_none_or(|rec| rec.info.is_none());

            set.spawn(async move {
                let health = match timeout(limit, query.health_log(&device)).await {
                    Ok(res) => res,
                    Err(_) => Err(QueryError::Timeout(limit)),
                };
                // Identity is only worth asking for once the device answers at all.
                let identity = if need_identity && health.is_ok() {
                    Some(match timeout(limit, query.identify(&device)).await {
                        Ok(res) => res,
                        Err(_) => Err(QueryError::Timeout(limit)),
                    })
                } else {
                    None
                };
                DeviceResult {
                    device,
                    health,
                    identity,
                }
            });
        }

        let mut results = Vec::with_capacity(self.devices.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(error = %e, "device query task failed"),
            }
        }
        results
    }

    /// Fold query results into the records. Failed devices keep their last snapshot
    /// but are marked stale, which keeps them out of the published file.
    async fn apply(&mut self, results: Vec<DeviceResult>, report: &mut CycleReport) {
        let diskstats = match &self.settings.diskstats_path {
            Some(path) => read_diskstats(path).await,
            None => None,
        };

        let answered: HashSet<String> = results.iter().map(|r| r.device.clone()).collect();
        for result in results {
            let Some(record) = self.records.get_mut(&result.device) else {
                continue;
            };
            match result.health {
                Ok(mut snapshot) => {
                    snapshot.validate(&result.device);
                    snapshot.io_in_progress = diskstats
                        .as_deref()
                        .and_then(|content| parse_in_flight(content, &result.device));
                    record.replace(snapshot);
                    report.polled.push(result.device.clone());
                }
                Err(e) => {
                    warn!(device = %result.device, error = %e, "health query failed, skipping device this cycle");
                    record.mark_stale();
                    report.failed.push(result.device.clone());
                }
            }
            match result.identity {
                Some(Ok(info)) => {
                    info!(
                        device = %result.device,
                        model = %info.model,
                        serial = %info.serial,
                        firmware = %info.firmware,
                        "identified controller"
                    );
                    record.set_info(info);
                }
                Some(Err(e)) => {
                    debug!(device = %result.device, error = %e, "identify failed, will retry")
                }
                None => {}
            }
        }

        // A task that panicked or was cancelled produced no result at all.
        for device in self.devices.iter().filter(|d| !answered.contains(*d)) {
            warn!(device = %device, "health query returned no result, skipping device this cycle");
            if let Some(record) = self.records.get_mut(device) {
                record.mark_stale();
            }
            report.failed.push(device.clone());
        }
        report.polled.sort();
        report.failed.sort();
    }

    /// Current exposition text for all healthy devices.
    pub fn render(&self) -> String {
        exposition::render(self.records.values())
    }

    /// Publish the current state atomically.
    async fn publish(&mut self) -> Result<()> {
        self.phase = Phase::Publishing;
        let text = self.render();
        let result = publish(&self.settings.output_file, &text).await;
        self.phase = Phase::Idle;
        result
    }

    /// One full cycle: discover if needed, poll, then publish.
    ///
    /// A publish failure is logged and the previous file stays in place.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut shutdown = watch::channel(false).1;
        self.cycle(&mut shutdown).await.unwrap_or_default()
    }

    /// Returns `None` when shutdown arrived during discovery or polling; nothing was
    /// written.
    async fn cycle(&mut self, shutdown: &mut watch::Receiver<bool>) -> Option<CycleReport> {
        tokio::select! {
            biased;
            _ = self.discover() => {}
            _ = wait_for_shutdown(shutdown) => {
                info!("shutdown during discovery, abandoning cycle");
                return None;
            }
        }
        let mut report = CycleReport::default();
        if self.devices.is_empty() {
            return Some(report);
        }

        self.phase = Phase::Polling;
        // Results that are already in win over a shutdown that raced them.
        let results = tokio::select! {
            biased;
            results = self.query_all() => results,
            _ = wait_for_shutdown(shutdown) => {
                info!("shutdown during polling, abandoning cycle");
                self.phase = Phase::Idle;
                return None;
            }
        };
        self.apply(results, &mut report).await;

        // Past this point the cycle always finishes, shutdown or not.
        match self.publish().await {
            Ok(()) => report.published = true,
            Err(e) => error!(error = %e, "publish failed, previous file left in place"),
        }
        debug!(polled = ?report.polled, failed = ?report.failed, "cycle complete");
        Some(report)
    }

    /// Run cycles on the configured interval until `shutdown` flips to true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval = ?self.settings.interval,
            output = %self.settings.output_file.display(),
            "poller started"
        );
        let mut ticker = interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
            if *shutdown.borrow() {
                break;
            }
            if self.cycle(&mut shutdown).await.is_none() {
                break;
            }
        }
        info!("poller stopped");
    }
}

/// Resolves once the shutdown flag is set. If the sender is gone, never resolves.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
