// src/collector/canned.rs
//! Scripted health query backend for tests and dry runs.
//!
//! Responses are raw tool output and go through the same parser as the real CLI
//! backend, so a canned device behaves exactly like one answering `nvme smart-log`.

use crate::collector::parse::{parse_id_ctrl, parse_smart_log};
use crate::collector::query::HealthQuery;
use crate::collector::record::{DeviceInfo, Snapshot};
use crate::error::QueryError;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted answer to a health query.
#[derive(Debug, Clone)]
pub enum CannedResponse {
    /// Tool output to be parsed.
    Output(String),
    /// The tool failed with this stderr.
    Fail(String),
    /// The query never completes; only a timeout ends it.
    Hang,
}

impl CannedResponse {
    pub fn output(text: impl Into<String>) -> Self {
        Self::Output(text.into())
    }
}

#[derive(Debug, Default)]
struct DeviceScript {
    /// Played in order; the last entry repeats forever.
    health: VecDeque<CannedResponse>,
    identity: Option<String>,
    calls: usize,
}

#[derive(Debug, Default)]
pub struct CannedQuery {
    devices: Mutex<HashMap<String, DeviceScript>>,
    discoverable: Vec<String>,
    probe_error: Option<String>,
}

impl CannedQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every health query for `device` with `response`.
    pub fn with_device(self, device: &str, response: CannedResponse) -> Self {
        self.with_script(device, vec![response])
    }

    /// Answer successive health queries for `device` from `responses`.
    pub fn with_script(self, device: &str, responses: Vec<CannedResponse>) -> Self {
        if let Ok(mut devices) = self.devices.lock() {
            devices.entry(device.to_string()).or_default().health = responses.into();
        }
        self
    }

    /// `nvme id-ctrl -o json` output for `device`.
    pub fn with_identity(self, device: &str, id_ctrl_json: impl Into<String>) -> Self {
        if let Ok(mut devices) = self.devices.lock() {
            devices.entry(device.to_string()).or_default().identity = Some(id_ctrl_json.into());
        }
        self
    }

    /// Controller names returned by discovery.
    pub fn with_discoverable(mut self, names: &[&str]) -> Self {
        self.discoverable = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Make the startup probe fail, as if the tool were not installed.
    pub fn with_probe_error(mut self, message: impl Into<String>) -> Self {
        self.probe_error = Some(message.into());
        self
    }

    /// Number of health queries issued for `device` so far.
    pub fn calls(&self, device: &str) -> usize {
        self.devices
            .lock()
            .ok()
            .and_then(|d| d.get(device).map(|s| s.calls))
            .unwrap_or(0)
    }

    fn next_health(&self, device: &str) -> Option<CannedResponse> {
        let mut devices = self.devices.lock().ok()?;
        let script = devices.get_mut(device)?;
        script.calls += 1;
        if script.health.len() > 1 {
            script.health.pop_front()
        } else {
            script.health.front().cloned()
        }
    }
}

impl HealthQuery for CannedQuery {
    async fn probe(&self) -> Result<(), QueryError> {
        match &self.probe_error {
            Some(msg) => Err(QueryError::Spawn {
                program: "canned".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, msg.clone()),
            }),
            None => Ok(()),
        }
    }

    async fn discover(&self) -> Result<Vec<String>, QueryError> {
        Ok(self.discoverable.clone())
    }

    async fn health_log(&self, device: &str) -> Result<Snapshot, QueryError> {
        // The lock is released before any await point.
        let response = self.next_health(device);
        match response {
            Some(CannedResponse::Output(text)) => parse_smart_log(&text),
            Some(CannedResponse::Fail(stderr)) => Err(QueryError::Failed {
                command: format!("nvme smart-log /dev/{device}"),
                status: "exit status: 1".to_string(),
                stderr,
            }),
            Some(CannedResponse::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(QueryError::Timeout(Duration::from_secs(3600)))
            }
            None => Err(QueryError::Failed {
                command: format!("nvme smart-log /dev/{device}"),
                status: "exit status: 1".to_string(),
                stderr: format!("/dev/{device}: No such file or directory"),
            }),
        }
    }

    async fn identify(&self, device: &str) -> Result<DeviceInfo, QueryError> {
        let identity = self
            .devices
            .lock()
            .ok()
            .and_then(|d| d.get(device).and_then(|s| s.identity.clone()));
        match identity {
            Some(text) => parse_id_ctrl(&text),
            None => Err(QueryError::Parse(format!("no identity scripted for {device}"))),
        }
    }
}
