// src/collector/parse.rs
//! Best-effort parsing of nvme-cli output.
//!
//! nvme-cli has changed both its JSON schema and its plain-text layout across releases,
//! so every extractor here tolerates missing keys, unknown keys, thousands separators and
//! trailing units. Missing values come back as `None`; only input with no recognizable
//! field at all is an error.

use crate::collector::record::{DeviceInfo, Snapshot, kelvin_to_celsius};
use crate::error::QueryError;
use serde_json::Value;

/// Which snapshot field a normalized key feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    CriticalWarning,
    Temperature,
    AvailableSpare,
    SpareThreshold,
    PercentageUsed,
    DataUnitsRead,
    DataUnitsWritten,
    HostReads,
    HostWrites,
    BusyTime,
    PowerCycles,
    PowerOnHours,
    UnsafeShutdowns,
    MediaErrors,
    ErrorLogEntries,
    WarningTempTime,
    CriticalTempTime,
}

/// Map a normalized key (lowercase, underscores) onto a field.
fn field_for(key: &str) -> Option<Field> {
    let field = match key {
        "critical_warning" => Field::CriticalWarning,
        "temperature" | "composite_temperature" => Field::Temperature,
        "avail_spare" | "available_spare" => Field::AvailableSpare,
        "spare_thresh" | "available_spare_threshold" => Field::SpareThreshold,
        "percent_used" | "percentage_used" => Field::PercentageUsed,
        "data_units_read" => Field::DataUnitsRead,
        "data_units_written" => Field::DataUnitsWritten,
        "host_read_commands" | "host_reads" => Field::HostReads,
        "host_write_commands" | "host_writes" => Field::HostWrites,
        "controller_busy_time" | "ctrl_busy_time" => Field::BusyTime,
        "power_cycles" => Field::PowerCycles,
        "power_on_hours" => Field::PowerOnHours,
        "unsafe_shutdowns" => Field::UnsafeShutdowns,
        "media_errors" | "media_and_data_integrity_errors" => Field::MediaErrors,
        "num_err_log_entries" | "error_log_entries" | "number_of_error_log_entries" => {
            Field::ErrorLogEntries
        }
        "warning_temp_time" | "warning_temperature_time" => Field::WarningTempTime,
        "critical_comp_time" | "critical_composite_temperature_time" => Field::CriticalTempTime,
        _ => return None,
    };
    Some(field)
}

fn normalize_key(key: &str) -> String {
    key.trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' | '\t' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Parse the first integer in `raw`, skipping thousands separators.
///
/// `"1,234,567 (633 GB)"` yields 1234567; `"100%"` yields 100.
pub fn parse_count(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let start = raw.find(|c: char| c.is_ascii_digit())?;
    let rest = &raw[start..];
    if let Some(hex) = rest.strip_prefix("0x") {
        let hex: String = hex.chars().take_while(char::is_ascii_hexdigit).collect();
        return u64::from_str_radix(&hex, 16).ok();
    }
    let digits: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '_')
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// A number immediately followed by the unit token `unit` (e.g. `"310 Kelvin"`,
/// `"310 K"`, `"37 C"`).
///
/// The unit must end at end-of-string, whitespace, `)` or `,`, so `K` never matches
/// inside a word such as `Kelvin`.
fn number_before(raw: &str, unit: &str) -> Option<f64> {
    raw.match_indices(unit).find_map(|(idx, _)| {
        let ends_token = raw[idx + unit.len()..]
            .chars()
            .next()
            .is_none_or(|c| c.is_whitespace() || c == ')' || c == ',');
        if !ends_token {
            return None;
        }
        let head = raw[..idx].trim_end().trim_end_matches('°').trim_end();
        let start = head
            .char_indices()
            .rev()
            .find(|(_, c)| !(c.is_ascii_digit() || *c == '.' || *c == '-'))
            .map_or(0, |(i, c)| i + c.len_utf8());
        head[start..].parse().ok()
    })
}

/// Temperature from a plain-text value, converted to Celsius exactly once.
///
/// An explicit Kelvin figure wins; an explicit Celsius figure is taken as-is; a bare
/// number is treated as Kelvin, matching the raw log page.
pub fn parse_text_temperature(raw: &str) -> Option<f64> {
    if let Some(k) = number_before(raw, "Kelvin").or_else(|| number_before(raw, "K")) {
        return Some(kelvin_to_celsius(k));
    }
    if let Some(c) = number_before(raw, "°C").or_else(|| number_before(raw, "C")) {
        return Some(c);
    }
    raw.trim().parse::<f64>().ok().map(kelvin_to_celsius)
}

/// Numeric value of a JSON node: a number, a numeric string, or `{"value": n}`.
fn json_count(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => parse_count(s),
        Value::Object(map) => map.get("value").and_then(json_count),
        _ => None,
    }
}

fn json_temperature(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64().map(kelvin_to_celsius),
        Value::String(s) => parse_text_temperature(s),
        Value::Object(map) => map.get("value").and_then(json_temperature),
        _ => None,
    }
}

fn assign(snap: &mut Snapshot, field: Field, count: Option<u64>, temp: Option<f64>) {
    let slot = match field {
        Field::Temperature => {
            snap.temperature_celsius = temp;
            return;
        }
        Field::CriticalWarning => &mut snap.critical_warning,
        Field::AvailableSpare => &mut snap.available_spare,
        Field::SpareThreshold => &mut snap.available_spare_threshold,
        Field::PercentageUsed => &mut snap.percentage_used,
        Field::DataUnitsRead => &mut snap.data_units_read,
        Field::DataUnitsWritten => &mut snap.data_units_written,
        Field::HostReads => &mut snap.host_read_commands,
        Field::HostWrites => &mut snap.host_write_commands,
        Field::BusyTime => &mut snap.controller_busy_time,
        Field::PowerCycles => &mut snap.power_cycles,
        Field::PowerOnHours => &mut snap.power_on_hours,
        Field::UnsafeShutdowns => &mut snap.unsafe_shutdowns,
        Field::MediaErrors => &mut snap.media_errors,
        Field::ErrorLogEntries => &mut snap.error_log_entries,
        Field::WarningTempTime => &mut snap.warning_temp_time,
        Field::CriticalTempTime => &mut snap.critical_temp_time,
    };
    *slot = count;
}

fn snapshot_from_json(root: &Value) -> Snapshot {
    let mut snap = Snapshot::default();
    if let Value::Object(map) = root {
        for (key, value) in map {
            if let Some(field) = field_for(&normalize_key(key)) {
                assign(&mut snap, field, json_count(value), json_temperature(value));
            }
        }
    }
    snap
}

fn snapshot_from_text(text: &str) -> Snapshot {
    let mut snap = Snapshot::default();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let Some(field) = field_for(&normalize_key(key)) else {
            continue;
        };
        if field == Field::Temperature {
            // First composite reading wins.
            if snap.temperature_celsius.is_none() {
                snap.temperature_celsius = parse_text_temperature(value);
            }
            continue;
        }
        assign(&mut snap, field, parse_count(value), None);
    }
    snap
}

/// Parse `nvme smart-log` output, JSON or plain text.
pub fn parse_smart_log(text: &str) -> Result<Snapshot, QueryError> {
    let trimmed = text.trim_start();
    let snap = if trimmed.starts_with('{') {
        let root: Value = serde_json::from_str(trimmed)
            .map_err(|e| QueryError::Parse(format!("smart-log JSON: {e}")))?;
        snapshot_from_json(&root)
    } else {
        snapshot_from_text(text)
    };

    if snap.is_empty() {
        return Err(QueryError::Parse(
            "no SMART fields recognized in output".to_string(),
        ));
    }
    Ok(snap)
}

/// Parse `nvme id-ctrl -o json` into descriptive fields.
pub fn parse_id_ctrl(text: &str) -> Result<DeviceInfo, QueryError> {
    let root: Value = serde_json::from_str(text.trim())
        .map_err(|e| QueryError::Parse(format!("id-ctrl JSON: {e}")))?;
    let field = |key: &str| {
        root.get(key)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };
    Ok(DeviceInfo {
        model: field("mn"),
        serial: field("sn"),
        firmware: field("fr"),
        capacity_bytes: root.get("tnvmcap").and_then(json_count).filter(|c| *c > 0),
    })
}

/// Reduce a device path like `/dev/nvme0n1` to its controller name `nvme0`.
pub fn controller_name(path: &str) -> Option<String> {
    let idx = path.find("nvme")?;
    let rest = &path[idx + "nvme".len()..];
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        None
    } else {
        Some(format!("nvme{digits}"))
    }
}

/// Controller names from `nvme list -o json`, sorted and de-duplicated.
pub fn parse_device_list(text: &str) -> Result<Vec<String>, QueryError> {
    let root: Value = serde_json::from_str(text.trim())
        .map_err(|e| QueryError::Parse(format!("device list JSON: {e}")))?;

    let mut names: Vec<String> = root
        .get("Devices")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|dev| dev.get("DevicePath").and_then(Value::as_str))
        .filter(|path| path.starts_with("/dev/nvme"))
        .filter_map(controller_name)
        .collect();

    names.sort();
    names.dedup();
    Ok(names)
}
