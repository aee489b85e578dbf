// src/exposition.rs
//! Prometheus text exposition of device records.

use crate::collector::record::{DeviceInfo, DeviceRecord, Snapshot};
use std::fmt::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    fn as_str(self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

/// A sample value. Integers print without a decimal point; floats are rounded to
/// hundredths so the output is stable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    Int(u64),
    Float(f64),
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Sample::Int(v) => write!(f, "{v}"),
            Sample::Float(v) => {
                let rounded = (v * 100.0).round() / 100.0;
                // Avoid "-0" for tiny negative readings.
                let rounded = if rounded == 0.0 { 0.0 } else { rounded };
                write!(f, "{rounded}")
            }
        }
    }
}

type Extract = fn(&Snapshot, Option<&DeviceInfo>) -> Option<Sample>;

pub struct MetricFamily {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: MetricKind,
    extract: Extract,
}

macro_rules! family {
    ($name:literal, $kind:ident, $help:literal, |$s:ident, $i:ident| $body:expr) => {
        MetricFamily {
            name: $name,
            help: $help,
            kind: MetricKind::$kind,
            extract: |$s, $i| $body,
        }
    };
    ($name:literal, $kind:ident, $help:literal, $field:ident) => {
        family!($name, $kind, $help, |s, _i| s.$field.map(Sample::Int))
    };
}

/// Every published family, in output order.
pub static FAMILIES: &[MetricFamily] = &[
    family!("nvme_temperature_celsius", Gauge,
        "Composite temperature of the NVMe controller in degrees Celsius",
        |s, _i| s.temperature_celsius.map(Sample::Float)),
    family!("nvme_available_spare_percent", Gauge,
        "Normalized remaining spare capacity", available_spare),
    family!("nvme_available_spare_threshold_percent", Gauge,
        "Spare capacity threshold below which the controller raises a warning",
        available_spare_threshold),
    family!("nvme_percentage_used", Gauge,
        "Vendor estimate of rated endurance used, may exceed 100", percentage_used),
    family!("nvme_critical_warning", Gauge,
        "Critical warning bitfield, 0 when healthy", critical_warning),
    family!("nvme_data_units_read_total", Counter,
        "Data units read, each unit is 1000 blocks of 512 bytes", data_units_read),
    family!("nvme_data_units_written_total", Counter,
        "Data units written, each unit is 1000 blocks of 512 bytes", data_units_written),
    family!("nvme_host_read_commands_total", Counter,
        "Read commands completed by the controller", host_read_commands),
    family!("nvme_host_write_commands_total", Counter,
        "Write commands completed by the controller", host_write_commands),
    family!("nvme_controller_busy_time_minutes_total", Counter,
        "Minutes the controller was busy with I/O commands", controller_busy_time),
    family!("nvme_power_on_hours_total", Counter, "Power-on hours", power_on_hours),
    family!("nvme_power_cycles_total", Counter, "Power cycles", power_cycles),
    family!("nvme_unsafe_shutdowns_total", Counter,
        "Unexpected power losses", unsafe_shutdowns),
    family!("nvme_media_errors_total", Counter,
        "Unrecovered data integrity errors", media_errors),
    family!("nvme_error_log_entries_total", Counter,
        "Error information log entries over the controller lifetime", error_log_entries),
    family!("nvme_warning_temperature_time_minutes_total", Counter,
        "Minutes spent above the warning composite temperature threshold", warning_temp_time),
    family!("nvme_critical_temperature_time_minutes_total", Counter,
        "Minutes spent above the critical composite temperature threshold", critical_temp_time),
    family!("nvme_io_in_progress", Gauge,
        "I/O operations in flight on the first namespace", io_in_progress),
    family!("nvme_capacity_bytes", Gauge,
        "Total NVM capacity reported by the controller",
        |_s, i| i.and_then(|i| i.capacity_bytes).map(Sample::Int)),
];

/// Escape a label value per the exposition format.
fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Render the current snapshot of every non-stale device.
///
/// Records must be supplied in a stable order; the poller keeps them sorted by name.
/// Families with no samples are left out entirely.
pub fn render<'a>(records: impl IntoIterator<Item = &'a DeviceRecord> + Clone) -> String {
    let mut out = String::new();
    for family in FAMILIES {
        let samples: Vec<(&str, Sample)> = records
            .clone()
            .into_iter()
            .filter_map(|rec| {
                let snap = rec.current()?;
                let value = (family.extract)(snap, rec.info.as_ref())?;
                Some((rec.name.as_str(), value))
            })
            .collect();
        if samples.is_empty() {
            continue;
        }
        // Writing to a String cannot fail.
        let _ = writeln!(out, "# HELP {} {}", family.name, family.help);
        let _ = writeln!(out, "# TYPE {} {}", family.name, family.kind.as_str());
        for (device, value) in samples {
            let _ = writeln!(
                out,
                "{}{{device=\"{}\"}} {}",
                family.name,
                escape_label(device),
                value
            );
        }
    }
    out
}
