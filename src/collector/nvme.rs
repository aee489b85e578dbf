// src/collector/nvme.rs
//! Health queries straight from the kernel: SMART log page via admin ioctl, identity
//! and discovery via sysfs.

use crate::collector::query::HealthQuery;
use crate::collector::record::{DeviceInfo, Snapshot, kelvin_to_celsius};
use crate::error::QueryError;
use linux_nvme_sys::{nvme_admin_cmd, nvme_admin_opcode::nvme_admin_get_log_page, nvme_smart_log};
use std::fs::OpenOptions;
use std::io;
use std::mem::{size_of, zeroed};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::debug;

/// SMART / Health Information log page identifier.
const SMART_LOG_ID: u8 = 0x02;

/// Talks to `/dev/nvmeX` directly. Needs CAP_SYS_ADMIN.
#[derive(Debug, Clone)]
pub struct IoctlQuery {
    sysfs_root: PathBuf,
    dev_root: PathBuf,
}

impl Default for IoctlQuery {
    fn default() -> Self {
        Self::new("/sys/class/nvme", "/dev")
    }
}

impl IoctlQuery {
    pub fn new(sysfs_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            dev_root: dev_root.into(),
        }
    }

    fn sysfs_attr(&self, device: &str, attr: &str) -> io::Result<String> {
        std::fs::read_to_string(self.sysfs_root.join(device).join(attr))
            .map(|s| s.trim().to_string())
    }
}

/// Map the raw log page into a snapshot. Multi-byte fields are little-endian; the
/// 128-bit counters are truncated to 64 bits.
pub fn snapshot_from_raw(raw: &nvme_smart_log) -> Snapshot {
    let kelvin = u16::from_le_bytes([raw.temperature[0], raw.temperature[1]]);
    Snapshot {
        critical_warning: Some(raw.critical_warning as u64),
        // A zero reading means the controller does not report temperature.
        temperature_celsius: (kelvin > 0).then(|| kelvin_to_celsius(f64::from(kelvin))),
        available_spare: Some(raw.avail_spare as u64),
        available_spare_threshold: Some(raw.spare_thresh as u64),
        percentage_used: Some(raw.percent_used as u64),
        data_units_read: Some(u128::from_le_bytes(raw.data_units_read) as u64),
        data_units_written: Some(u128::from_le_bytes(raw.data_units_written) as u64),
        host_read_commands: Some(u128::from_le_bytes(raw.host_reads) as u64),
        host_write_commands: Some(u128::from_le_bytes(raw.host_writes) as u64),
        controller_busy_time: Some(u128::from_le_bytes(raw.ctrl_busy_time) as u64),
        power_cycles: Some(u128::from_le_bytes(raw.power_cycles) as u64),
        power_on_hours: Some(u128::from_le_bytes(raw.power_on_hours) as u64),
        unsafe_shutdowns: Some(u128::from_le_bytes(raw.unsafe_shutdowns) as u64),
        media_errors: Some(u128::from_le_bytes(raw.media_errors) as u64),
        error_log_entries: Some(u128::from_le_bytes(raw.num_err_log_entries) as u64),
        warning_temp_time: Some(u32::from(raw.warning_temp_time) as u64),
        critical_temp_time: Some(u32::from(raw.critical_comp_time) as u64),
        io_in_progress: None,
    }
}

/// Read the SMART log page from a controller character device such as `/dev/nvme0`.
pub fn read_smart_log_raw(dev_path: &Path) -> io::Result<nvme_smart_log> {
    // Admin commands need the device opened for writing.
    let file = OpenOptions::new().read(true).write(true).open(dev_path)?;
    let fd = file.as_raw_fd();

    // Zeroed buffer the kernel fills in place.
    let mut log: nvme_smart_log = unsafe { zeroed() };
    let log_ptr = &mut log as *mut nvme_smart_log as u64;
    let log_len = size_of::<nvme_smart_log>() as u32;

    // NUMD is zero-based and counted in dwords.
    let numd: u32 = log_len / 4 - 1;
    let cdw10: u32 = (SMART_LOG_ID as u32) | (numd << 16);

    let mut cmd: nvme_admin_cmd = unsafe { zeroed() };
    cmd.opcode = nvme_admin_get_log_page as u8;
    // Controller-wide log: the namespace must be 0 or 0xFFFFFFFF.
    cmd.nsid = 0xFFFF_FFFF;
    cmd.addr = log_ptr;
    cmd.data_len = log_len;
    cmd.cdw10 = cdw10;
    cmd.cdw11 = 0;
    cmd.timeout_ms = 1000;

    let ret = unsafe { linux_nvme_sys::nvme_ioctl_admin_cmd(fd, &mut cmd) };

    match ret {
        Ok(0) => Ok(log),
        Ok(status) => Err(io::Error::other(format!(
            "NVMe admin command failed, status={status:#x}"
        ))),
        Err(e) => Err(io::Error::other(e.to_string())),
    }
}

impl HealthQuery for IoctlQuery {
    async fn probe(&self) -> Result<(), QueryError> {
        tokio::fs::metadata(&self.sysfs_root)
            .await
            .map(|_| ())
            .map_err(|e| {
                QueryError::Io(io::Error::new(
                    e.kind(),
                    format!("{}: {e} (is the nvme driver loaded?)", self.sysfs_root.display()),
                ))
            })
    }

    async fn discover(&self) -> Result<Vec<String>, QueryError> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.sysfs_root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // Skip fabrics and subsystem links such as nvme-fabrics.
            let is_controller = name
                .strip_prefix("nvme")
                .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));
            if is_controller {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn health_log(&self, device: &str) -> Result<Snapshot, QueryError> {
        let dev_path = self.dev_root.join(device);
        debug!(path = %dev_path.display(), "issuing SMART log page ioctl");
        let raw = tokio::task::spawn_blocking(move || read_smart_log_raw(&dev_path))
            .await
            .map_err(|e| QueryError::Io(io::Error::other(e)))??;
        Ok(snapshot_from_raw(&raw))
    }

    async fn identify(&self, device: &str) -> Result<DeviceInfo, QueryError> {
        Ok(DeviceInfo {
            model: self.sysfs_attr(device, "model")?,
            serial: self.sysfs_attr(device, "serial")?,
            firmware: self.sysfs_attr(device, "firmware_rev").unwrap_or_default(),
            capacity_bytes: None,
        })
    }
}
