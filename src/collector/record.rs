// src/collector/record.rs
//! Per-device telemetry records.

use tracing::warn;

/// Offset between the Kelvin and Celsius scales.
pub const KELVIN_OFFSET: f64 = 273.15;

/// Plausible operating range for a composite temperature reading.
pub const TEMPERATURE_RANGE_CELSIUS: std::ops::RangeInclusive<f64> = -40.0..=125.0;

/// Convert a Kelvin reading to Celsius. This is the only place the conversion happens.
pub fn kelvin_to_celsius(kelvin: f64) -> f64 {
    kelvin - KELVIN_OFFSET
}

/// Descriptive controller identity, read once per process lifetime.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceInfo {
    pub model: String,
    pub serial: String,
    pub firmware: String,
    /// Total NVM capacity in bytes, when the controller reports it.
    pub capacity_bytes: Option<u64>,
}

/// One point-in-time SMART/health reading.
///
/// Every field is optional: a value the backend did not report stays `None` and is
/// never published, rather than showing up as a fabricated zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Critical Warning bitmask (byte 00). Zero means no warnings.
    pub critical_warning: Option<u64>,

    /// Composite temperature, already converted to Celsius.
    pub temperature_celsius: Option<f64>,

    /// Remaining spare capacity, 0-100.
    pub available_spare: Option<u64>,

    /// Spare threshold below which the controller raises an event, 0-100.
    pub available_spare_threshold: Option<u64>,

    /// Vendor estimate of life used. May exceed 100 (NVMe allows up to 255).
    pub percentage_used: Option<u64>,

    /// Thousands of 512-byte units read.
    pub data_units_read: Option<u64>,

    /// Thousands of 512-byte units written.
    pub data_units_written: Option<u64>,

    pub host_read_commands: Option<u64>,
    pub host_write_commands: Option<u64>,

    /// Minutes the controller was busy with I/O.
    pub controller_busy_time: Option<u64>,

    pub power_cycles: Option<u64>,
    pub power_on_hours: Option<u64>,
    pub unsafe_shutdowns: Option<u64>,
    pub media_errors: Option<u64>,
    pub error_log_entries: Option<u64>,

    /// Minutes spent between the warning and critical composite temperature thresholds.
    pub warning_temp_time: Option<u64>,

    /// Minutes spent at or above the critical composite temperature threshold.
    pub critical_temp_time: Option<u64>,

    /// In-flight I/O for the device's first namespace, from /proc/diskstats.
    pub io_in_progress: Option<u64>,
}

impl Snapshot {
    /// True when no telemetry field was recovered at all.
    pub fn is_empty(&self) -> bool {
        *self == Snapshot::default()
    }

    /// Drop readings outside their physical ranges, logging each one.
    pub fn validate(&mut self, device: &str) {
        if let Some(t) = self.temperature_celsius {
            if !TEMPERATURE_RANGE_CELSIUS.contains(&t) {
                warn!(device, temperature_celsius = t, "temperature out of range, dropping");
                self.temperature_celsius = None;
            }
        }
        for (name, field) in [
            ("available_spare", &mut self.available_spare),
            ("available_spare_threshold", &mut self.available_spare_threshold),
        ] {
            if let Some(v) = *field {
                if v > 100 {
                    warn!(device, field = name, value = v, "percentage out of range, dropping");
                    *field = None;
                }
            }
        }
    }

    /// Cumulative counters, paired with their field names.
    fn counters(&self) -> [(&'static str, Option<u64>); 12] {
        [
            ("data_units_read", self.data_units_read),
            ("data_units_written", self.data_units_written),
            ("host_read_commands", self.host_read_commands),
            ("host_write_commands", self.host_write_commands),
            ("controller_busy_time", self.controller_busy_time),
            ("power_cycles", self.power_cycles),
            ("power_on_hours", self.power_on_hours),
            ("unsafe_shutdowns", self.unsafe_shutdowns),
            ("media_errors", self.media_errors),
            ("error_log_entries", self.error_log_entries),
            ("warning_temp_time", self.warning_temp_time),
            ("critical_temp_time", self.critical_temp_time),
        ]
    }
}

/// Names of cumulative counters that went backwards between two snapshots.
///
/// Counters missing from either side are not compared.
pub fn counter_regressions(prev: &Snapshot, next: &Snapshot) -> Vec<&'static str> {
    prev.counters()
        .into_iter()
        .zip(next.counters())
        .filter_map(|((name, before), (_, after))| match (before, after) {
            (Some(b), Some(a)) if a < b => Some(name),
            _ => None,
        })
        .collect()
}

/// Everything the poller knows about one controller.
#[derive(Debug, Clone, Default)]
pub struct DeviceRecord {
    /// Controller handle, e.g. "nvme0".
    pub name: String,
    pub info: Option<DeviceInfo>,
    pub snapshot: Option<Snapshot>,
    /// Set when the most recent poll failed; the snapshot is then last-known, not current.
    pub stale: bool,
}

impl DeviceRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Snapshot to publish, if the device is currently healthy.
    pub fn current(&self) -> Option<&Snapshot> {
        if self.stale { None } else { self.snapshot.as_ref() }
    }

    /// Replace the snapshot wholesale with a fresh reading.
    pub fn replace(&mut self, next: Snapshot) {
        if let Some(prev) = &self.snapshot {
            let regressed = counter_regressions(prev, &next);
            if !regressed.is_empty() {
                warn!(device = %self.name, counters = ?regressed, "counters went backwards, assuming device reset");
            }
        }
        self.snapshot = Some(next);
        self.stale = false;
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Store identity on first read only.
    pub fn set_info(&mut self, info: DeviceInfo) {
        if self.info.is_none() {
            self.info = Some(info);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_temperature_converts_to_37() {
        let c = kelvin_to_celsius(310.15);
        assert!((c - 37.0).abs() < 1e-9, "got {c}");
    }

    #[test]
    fn conversion_is_plain_offset() {
        for k in [0.0, 233.15, 273.15, 300.0, 310.15, 398.15, 65535.0] {
            assert_eq!(kelvin_to_celsius(k), k - 273.15);
        }
    }

    #[test]
    fn validate_drops_implausible_values() {
        let mut s = Snapshot {
            temperature_celsius: Some(kelvin_to_celsius(0.0)),
            available_spare: Some(250),
            available_spare_threshold: Some(10),
            percentage_used: Some(120),
            ..Snapshot::default()
        };
        s.validate("nvme0");
        assert_eq!(s.temperature_celsius, None);
        assert_eq!(s.available_spare, None);
        assert_eq!(s.available_spare_threshold, Some(10));
        // Endurance estimates may legitimately exceed 100.
        assert_eq!(s.percentage_used, Some(120));
    }

    #[test]
    fn regressions_only_for_present_counters() {
        let prev = Snapshot {
            data_units_read: Some(100),
            power_on_hours: Some(50),
            media_errors: Some(1),
            ..Snapshot::default()
        };
        let next = Snapshot {
            data_units_read: Some(90),
            power_on_hours: Some(51),
            media_errors: None,
            ..Snapshot::default()
        };
        assert_eq!(counter_regressions(&prev, &next), vec!["data_units_read"]);
        assert!(counter_regressions(&prev, &prev).is_empty());
    }

    #[test]
    fn record_lifecycle() {
        let mut rec = DeviceRecord::new("nvme0");
        assert!(rec.current().is_none());

        rec.replace(Snapshot {
            media_errors: Some(0),
            ..Snapshot::default()
        });
        assert!(rec.current().is_some());

        rec.mark_stale();
        assert!(rec.current().is_none());
        assert!(rec.snapshot.is_some(), "last-known values are retained");

        rec.set_info(DeviceInfo {
            model: "first".into(),
            ..DeviceInfo::default()
        });
        rec.set_info(DeviceInfo {
            model: "second".into(),
            ..DeviceInfo::default()
        });
        assert_eq!(rec.info.as_ref().map(|i| i.model.as_str()), Some("first"));
    }
}
