// src/collector/mod.rs

pub mod canned;
pub mod cli;
pub mod diskstats;
pub mod nvme;
pub mod parse;
pub mod query;
pub mod record;

pub use canned::{CannedQuery, CannedResponse};
pub use cli::NvmeCli;
pub use nvme::IoctlQuery;
pub use query::HealthQuery;
pub use record::{DeviceInfo, DeviceRecord, Snapshot, kelvin_to_celsius};
