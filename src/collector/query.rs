// src/collector/query.rs
//! The narrow capability the poller needs from the hardware.

use crate::collector::record::{DeviceInfo, Snapshot};
use crate::error::QueryError;
use std::future::Future;

/// Source of NVMe health telemetry.
///
/// Implementations must be cheap to share across tasks; the poller holds one behind an
/// `Arc` and queries every device concurrently.
pub trait HealthQuery: Send + Sync + 'static {
    /// Startup check that the backend can be used at all. Failure is fatal.
    fn probe(&self) -> impl Future<Output = Result<(), QueryError>> + Send;

    /// Enumerate controller names present on the host, e.g. `["nvme0", "nvme1"]`.
    fn discover(&self) -> impl Future<Output = Result<Vec<String>, QueryError>> + Send;

    /// One SMART/health reading for a controller.
    fn health_log(&self, device: &str)
    -> impl Future<Output = Result<Snapshot, QueryError>> + Send;

    /// Descriptive identity for a controller.
    fn identify(&self, device: &str) -> impl Future<Output = Result<DeviceInfo, QueryError>> + Send;
}
