// src/config.rs
//! Runtime configuration: defaults, then an optional JSON file, then environment
//! variables and flags (clap resolves the last two, flags winning).

use crate::collector::parse::controller_name;
use crate::error::{ExporterError, Result};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_METRICS_DIR: &str = "/var/lib/node_exporter";
pub const OUTPUT_FILE_NAME: &str = "nvme_metrics.prom";
pub const DEFAULT_DISKSTATS: &str = "/proc/diskstats";

/// Where health telemetry comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Shell out to nvme-cli.
    #[default]
    Cli,
    /// Issue the SMART log admin command directly.
    Ioctl,
}

/// Command-line flags. Every flag can also come from the environment.
#[derive(Debug, Default, Parser)]
#[command(
    name = "nvme-exporter",
    version,
    about = "Publish NVMe SMART telemetry for the Prometheus textfile collector"
)]
pub struct Args {
    /// JSON config file.
    #[arg(long, env = "NVME_EXPORTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Seconds between poll cycles.
    #[arg(long = "interval", env = "NVME_UPDATE_INTERVAL")]
    pub interval_secs: Option<u64>,

    /// Directory the textfile collector watches.
    #[arg(long, env = "METRICS_DIR")]
    pub metrics_dir: Option<PathBuf>,

    /// Full output path; overrides --metrics-dir.
    #[arg(long, env = "NVME_OUTPUT_FILE")]
    pub output_file: Option<PathBuf>,

    /// Controllers to poll, e.g. nvme0,nvme1. Discovered when empty.
    #[arg(long, env = "NVME_DEVICES", value_delimiter = ',')]
    pub devices: Vec<String>,

    /// Per-device query timeout in seconds.
    #[arg(long = "query-timeout", env = "NVME_QUERY_TIMEOUT")]
    pub query_timeout_secs: Option<u64>,

    /// Path to the nvme-cli binary.
    #[arg(long = "nvme-cli", env = "NVME_CLI_PATH")]
    pub nvme_cli: Option<PathBuf>,

    #[arg(long, value_enum, env = "NVME_BACKEND")]
    pub backend: Option<Backend>,

    /// diskstats file used for in-flight I/O counts.
    #[arg(long = "diskstats", env = "NVME_DISKSTATS_PATH")]
    pub diskstats_path: Option<PathBuf>,

    /// Log filter, e.g. "info" or "nvme_exporter=debug".
    #[arg(long, env = "NVME_EXPORTER_LOG", default_value = "info")]
    pub log_level: String,

    /// Run a single cycle and exit.
    #[arg(long)]
    pub once: bool,
}

/// Config file layout. All keys are optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub interval_secs: Option<u64>,
    pub metrics_dir: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
    #[serde(default)]
    pub devices: Vec<String>,
    pub query_timeout_secs: Option<u64>,
    pub nvme_cli: Option<PathBuf>,
    pub backend: Option<Backend>,
    pub diskstats_path: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| ExporterError::ConfigFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| ExporterError::ConfigFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub interval: Duration,
    pub query_timeout: Duration,
    pub output_file: PathBuf,
    /// Explicit device list, de-duplicated. Empty means discover.
    pub devices: Vec<String>,
    pub nvme_cli: PathBuf,
    pub backend: Backend,
    pub diskstats_path: PathBuf,
    pub once: bool,
}

impl Config {
    /// Merge flags/env over the config file (if any) over defaults.
    pub fn resolve(args: &Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(args, file)
    }

    pub fn merge(args: &Args, file: FileConfig) -> Result<Self> {
        let interval_secs = args
            .interval_secs
            .or(file.interval_secs)
            .unwrap_or(DEFAULT_INTERVAL_SECS);
        let timeout_secs = args
            .query_timeout_secs
            .or(file.query_timeout_secs)
            .unwrap_or(DEFAULT_QUERY_TIMEOUT_SECS);

        if interval_secs == 0 {
            return Err(ExporterError::Config("interval must be at least 1 second".into()));
        }
        if timeout_secs == 0 {
            return Err(ExporterError::Config(
                "query timeout must be at least 1 second".into(),
            ));
        }
        if timeout_secs >= interval_secs {
            warn!(
                timeout_secs,
                interval_secs, "query timeout is not shorter than the poll interval"
            );
        }

        let output_file = match args.output_file.clone().or(file.output_file) {
            Some(path) => path,
            None => args
                .metrics_dir
                .clone()
                .or(file.metrics_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_METRICS_DIR))
                .join(OUTPUT_FILE_NAME),
        };

        let devices = if args.devices.is_empty() {
            file.devices
        } else {
            args.devices.clone()
        };

        Ok(Self {
            interval: Duration::from_secs(interval_secs),
            query_timeout: Duration::from_secs(timeout_secs),
            output_file,
            devices: dedup_devices(devices),
            nvme_cli: args
                .nvme_cli
                .clone()
                .or(file.nvme_cli)
                .unwrap_or_else(|| PathBuf::from("nvme")),
            backend: args.backend.or(file.backend).unwrap_or_default(),
            diskstats_path: args
                .diskstats_path
                .clone()
                .or(file.diskstats_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DISKSTATS)),
            once: args.once,
        })
    }
}

/// Reduce configured names to controller names (`nvme0`), dropping blanks and
/// duplicates (first wins).
///
/// `/dev/nvme0` and namespace names such as `nvme0n1` map to their controller, since
/// health logs and the in-flight gauge are keyed by controller. Names that are not
/// NVMe devices at all are skipped with a warning.
pub fn dedup_devices(devices: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(devices.len());
    for raw in devices {
        let given = raw.trim().trim_start_matches("/dev/");
        if given.is_empty() {
            continue;
        }
        let Some(name) = given
            .starts_with("nvme")
            .then(|| controller_name(given))
            .flatten()
        else {
            warn!(device = %given, "not an NVMe controller name, ignoring");
            continue;
        };
        if name != given {
            warn!(device = %given, controller = %name, "namespace name configured, polling its controller");
        }
        if seen.insert(name.clone()) {
            out.push(name);
        } else {
            warn!(device = %name, "duplicate device in configuration, ignoring");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["nvme-exporter"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn defaults() {
        let cfg = Config::merge(&Args::default(), FileConfig::default()).unwrap();
        assert_eq!(cfg.interval, Duration::from_secs(30));
        assert_eq!(cfg.query_timeout, Duration::from_secs(10));
        assert_eq!(
            cfg.output_file,
            PathBuf::from("/var/lib/node_exporter/nvme_metrics.prom")
        );
        assert!(cfg.devices.is_empty());
        assert_eq!(cfg.backend, Backend::Cli);
        assert_eq!(cfg.nvme_cli, PathBuf::from("nvme"));
    }

    #[test]
    fn flags_override_file() {
        let file: FileConfig = serde_json::from_str(
            r#"{"interval_secs": 60, "metrics_dir": "/srv/metrics", "devices": ["nvme3"], "backend": "ioctl"}"#,
        )
        .unwrap();
        let a = Args {
            interval_secs: Some(15),
            ..Args::default()
        };
        let cfg = Config::merge(&a, file).unwrap();
        assert_eq!(cfg.interval, Duration::from_secs(15));
        assert_eq!(cfg.output_file, PathBuf::from("/srv/metrics/nvme_metrics.prom"));
        assert_eq!(cfg.devices, vec!["nvme3"]);
        assert_eq!(cfg.backend, Backend::Ioctl);
    }

    #[test]
    fn output_file_beats_metrics_dir() {
        let a = Args {
            metrics_dir: Some("/a".into()),
            output_file: Some("/b/custom.prom".into()),
            ..Args::default()
        };
        let cfg = Config::merge(&a, FileConfig::default()).unwrap();
        assert_eq!(cfg.output_file, PathBuf::from("/b/custom.prom"));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let a = Args {
            interval_secs: Some(0),
            ..Args::default()
        };
        assert!(matches!(
            Config::merge(&a, FileConfig::default()),
            Err(ExporterError::Config(_))
        ));
        let a = Args {
            query_timeout_secs: Some(0),
            ..Args::default()
        };
        assert!(Config::merge(&a, FileConfig::default()).is_err());
    }

    #[test]
    fn device_flag_splits_and_dedups() {
        let a = args(&["--devices", "nvme0,/dev/nvme1, nvme0,,nvme2"]);
        let cfg = Config::merge(&a, FileConfig::default()).unwrap();
        assert_eq!(cfg.devices, vec!["nvme0", "nvme1", "nvme2"]);
    }

    #[test]
    fn namespace_names_collapse_onto_controller() {
        let devices = ["nvme0n1", "nvme0", "/dev/nvme1n1", "sda", "nvme1"]
            .map(String::from)
            .to_vec();
        assert_eq!(dedup_devices(devices), vec!["nvme0", "nvme1"]);
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, r#"{"intervall": 5}"#).unwrap();
        assert!(matches!(
            FileConfig::load(&path),
            Err(ExporterError::ConfigFile { .. })
        ));
    }

    #[test]
    fn resolve_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, r#"{"output_file": "/tmp/x.prom", "query_timeout_secs": 5}"#)
            .unwrap();
        let a = Args {
            config: Some(path),
            ..Args::default()
        };
        let cfg = Config::resolve(&a).unwrap();
        assert_eq!(cfg.output_file, PathBuf::from("/tmp/x.prom"));
        assert_eq!(cfg.query_timeout, Duration::from_secs(5));
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let a = Args {
            config: Some("/nonexistent/nvme-exporter.json".into()),
            ..Args::default()
        };
        assert!(Config::resolve(&a).is_err());
    }
}
