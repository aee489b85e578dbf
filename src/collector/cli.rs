// src/collector/cli.rs
//! Health queries through the nvme-cli binary.

use crate::collector::parse::{parse_device_list, parse_id_ctrl, parse_smart_log};
use crate::collector::query::HealthQuery;
use crate::collector::record::{DeviceInfo, Snapshot};
use crate::error::QueryError;
use std::path::PathBuf;
use std::str;
use tokio::process::Command;
use tracing::trace;

/// Shells out to `nvme` for every query.
#[derive(Debug, Clone)]
pub struct NvmeCli {
    program: PathBuf,
}

impl NvmeCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run `nvme <args>` and return stdout.
    ///
    /// The child is killed if this future is dropped, so a caller-side timeout never
    /// leaves a stuck process behind.
    async fn run(&self, args: &[&str]) -> Result<String, QueryError> {
        let program = self.program.display().to_string();
        trace!(%program, ?args, "running");

        let output = Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| QueryError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(QueryError::Failed {
                command: format!("{program} {}", args.join(" ")),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        str::from_utf8(&output.stdout)
            .map(|s| s.to_string())
            .map_err(|e| QueryError::Parse(format!("non-UTF-8 output: {e}")))
    }
}

impl Default for NvmeCli {
    fn default() -> Self {
        Self::new("nvme")
    }
}

impl HealthQuery for NvmeCli {
    async fn probe(&self) -> Result<(), QueryError> {
        self.run(&["version"]).await.map(|_| ())
    }

    async fn discover(&self) -> Result<Vec<String>, QueryError> {
        let out = self.run(&["list", "-o", "json"]).await?;
        // Older releases print nothing at all when no controller is present.
        if out.trim().is_empty() {
            return Ok(Vec::new());
        }
        parse_device_list(&out)
    }

    async fn health_log(&self, device: &str) -> Result<Snapshot, QueryError> {
        let dev_path = format!("/dev/{device}");
        let out = self.run(&["smart-log", dev_path.as_str(), "-o", "json"]).await?;
        parse_smart_log(&out)
    }

    async fn identify(&self, device: &str) -> Result<DeviceInfo, QueryError> {
        let dev_path = format!("/dev/{device}");
        let out = self.run(&["id-ctrl", dev_path.as_str(), "-o", "json"]).await?;
        parse_id_ctrl(&out)
    }
}
