use nvme_exporter::collector::{CannedQuery, CannedResponse};
use nvme_exporter::config::{Args, Config, FileConfig};
use nvme_exporter::publish::publish;
use nvme_exporter::*;
#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::watch;

    const DEVICE_A: &str = r#"{
        "critical_warning": 0,
        "temperature": 330,
        "avail_spare": 100,
        "spare_thresh": 10,
        "percent_used": 1,
        "data_units_read": 76900000,
        "data_units_written": 54300000,
        "host_read_commands": 900000000,
        "host_write_commands": 700000000,
        "controller_busy_time": 300,
        "power_cycles": 40,
        "power_on_hours": 2000,
        "unsafe_shutdowns": 3,
        "media_errors": 0,
        "num_err_log_entries": 0,
        "warning_temp_time": 0,
        "critical_comp_time": 0
    }"#;

    fn smart_with_hours(hours: u64, read: u64) -> CannedResponse {
        CannedResponse::output(format!(
            r#"{{"temperature": 310, "power_on_hours": {hours}, "data_units_read": {read}}}"#
        ))
    }

    fn settings(dir: &TempDir, interval_ms: u64, timeout_ms: u64) -> PollerSettings {
        PollerSettings {
            interval: Duration::from_millis(interval_ms),
            query_timeout: Duration::from_millis(timeout_ms),
            output_file: dir.path().join("nvme_metrics.prom"),
            diskstats_path: None,
        }
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    fn lines_for<'a>(text: &'a str, device: &str) -> Vec<&'a str> {
        let label = format!("{{device=\"{device}\"}}");
        text.lines().filter(|l| l.contains(&label)).collect()
    }

    #[tokio::test]
    async fn test_healthy_and_timed_out_device() {
        let dir = TempDir::new().unwrap();
        let query = Arc::new(
            CannedQuery::new()
                .with_device("nvme0", CannedResponse::output(DEVICE_A))
                .with_device("nvme1", CannedResponse::Hang),
        );
        let mut poller = Poller::new(
            query,
            settings(&dir, 1000, 100),
            vec!["nvme0".into(), "nvme1".into()],
        );

        let report = poller.run_cycle().await;
        assert_eq!(report.polled, vec!["nvme0"]);
        assert_eq!(report.failed, vec!["nvme1"]);
        assert!(report.published);

        let text = read(&dir.path().join("nvme_metrics.prom"));
        // 17 SMART fields reported by device A, one line each.
        assert_eq!(lines_for(&text, "nvme0").len(), 17, "{text}");
        assert!(lines_for(&text, "nvme1").is_empty(), "{text}");
        assert!(text.contains("nvme_temperature_celsius{device=\"nvme0\"} 56.85\n"));
        assert!(text.contains("nvme_data_units_read_total{device=\"nvme0\"} 76900000\n"));
    }

    #[tokio::test]
    async fn test_partial_failure_isolation() {
        let dir = TempDir::new().unwrap();
        let names = ["nvme0", "nvme1", "nvme2", "nvme3"];
        let mut query = CannedQuery::new();
        for name in names {
            let response = if name == "nvme2" {
                CannedResponse::Fail("NVMe status: Access Denied".into())
            } else {
                CannedResponse::output(DEVICE_A)
            };
            query = query.with_device(name, response);
        }
        let mut poller = Poller::new(
            Arc::new(query),
            settings(&dir, 1000, 500),
            names.iter().map(|n| n.to_string()).collect(),
        );

        let report = poller.run_cycle().await;
        assert_eq!(report.failed, vec!["nvme2"]);
        let text = read(&dir.path().join("nvme_metrics.prom"));
        for name in ["nvme0", "nvme1", "nvme3"] {
            assert_eq!(lines_for(&text, name).len(), 17, "{name}");
        }
        assert!(lines_for(&text, "nvme2").is_empty());
    }

    #[tokio::test]
    async fn test_failed_device_keeps_last_snapshot_but_is_not_published() {
        let dir = TempDir::new().unwrap();
        let query = Arc::new(CannedQuery::new().with_script(
            "nvme0",
            vec![
                CannedResponse::output(DEVICE_A),
                CannedResponse::Fail("device busy".into()),
                CannedResponse::output(DEVICE_A),
            ],
        ));
        let mut poller = Poller::new(query, settings(&dir, 1000, 500), vec!["nvme0".into()]);
        let out = dir.path().join("nvme_metrics.prom");

        poller.run_cycle().await;
        assert!(!lines_for(&read(&out), "nvme0").is_empty());

        poller.run_cycle().await;
        let record = poller.record("nvme0").unwrap();
        assert!(record.stale);
        assert!(record.snapshot.is_some());
        assert!(lines_for(&read(&out), "nvme0").is_empty());

        // Recovers on the next successful poll.
        poller.run_cycle().await;
        assert!(!poller.record("nvme0").unwrap().stale);
        assert_eq!(lines_for(&read(&out), "nvme0").len(), 17);
    }

    #[tokio::test]
    async fn test_counters_monotonic_across_polls() {
        let dir = TempDir::new().unwrap();
        let query = Arc::new(CannedQuery::new().with_script(
            "nvme0",
            vec![smart_with_hours(100, 5000), smart_with_hours(101, 5200)],
        ));
        let mut poller = Poller::new(query, settings(&dir, 1000, 500), vec!["nvme0".into()]);

        poller.run_cycle().await;
        let first = poller.record("nvme0").unwrap().snapshot.clone().unwrap();
        poller.run_cycle().await;
        let second = poller.record("nvme0").unwrap().snapshot.clone().unwrap();

        assert!(second.power_on_hours >= first.power_on_hours);
        assert!(second.data_units_read >= first.data_units_read);
        assert!(collector::record::counter_regressions(&first, &second).is_empty());
    }

    #[tokio::test]
    async fn test_same_state_publishes_identical_bytes() {
        let dir = TempDir::new().unwrap();
        let query = Arc::new(
            CannedQuery::new()
                .with_device("nvme1", CannedResponse::output(DEVICE_A))
                .with_device("nvme0", CannedResponse::output(DEVICE_A)),
        );
        let mut poller = Poller::new(
            query,
            settings(&dir, 1000, 500),
            vec!["nvme1".into(), "nvme0".into()],
        );
        let out = dir.path().join("nvme_metrics.prom");

        poller.run_cycle().await;
        let first = std::fs::read(&out).unwrap();
        poller.run_cycle().await;
        let second = std::fs::read(&out).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_concurrent_reader_never_sees_partial_file() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("nvme_metrics.prom");
        let old = "old_metric 1\n".repeat(20_000);
        let new = "new_metric 2\n".repeat(20_000);
        publish(&out, &old).await.unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let (out, old, new, stop) = (out.clone(), old.clone(), new.clone(), stop.clone());
            std::thread::spawn(move || {
                let mut reads = 0usize;
                while !stop.load(Ordering::Relaxed) {
                    let seen = std::fs::read_to_string(&out).unwrap();
                    assert!(seen == old || seen == new, "torn read of {} bytes", seen.len());
                    reads += 1;
                }
                reads
            })
        };

        for i in 0..50 {
            let body = if i % 2 == 0 { &new } else { &old };
            publish(&out, body).await.unwrap();
        }
        stop.store(true, Ordering::Relaxed);
        let reads = reader.join().expect("reader saw a torn file");
        assert!(reads > 0);
    }

    #[tokio::test]
    async fn test_loop_keeps_cycling_and_stops_on_signal() {
        let dir = TempDir::new().unwrap();
        let query = Arc::new(
            CannedQuery::new()
                .with_device("nvme0", CannedResponse::output(DEVICE_A))
                .with_device("nvme1", CannedResponse::Hang),
        );
        let poller = Poller::new(
            Arc::clone(&query),
            settings(&dir, 30, 20),
            vec!["nvme0".into(), "nvme1".into()],
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(poller.run(rx));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while query.calls("nvme0") < 3 {
            assert!(tokio::time::Instant::now() < deadline, "poller stalled");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(query.calls("nvme1") >= 2, "timed-out device is retried");

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("poller did not stop")
            .unwrap();

        let text = read(&dir.path().join("nvme_metrics.prom"));
        assert_eq!(lines_for(&text, "nvme0").len(), 17);
        assert!(lines_for(&text, "nvme1").is_empty());
    }

    fn config_for(dir: &TempDir, output: PathBuf) -> Config {
        let args = Args {
            output_file: Some(output),
            devices: vec!["nvme0".into()],
            once: true,
            ..Args::default()
        };
        let mut cfg = Config::merge(&args, FileConfig::default()).unwrap();
        cfg.diskstats_path = dir.path().join("no-diskstats");
        cfg
    }

    #[tokio::test]
    async fn test_serve_once_publishes() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("textfile/nvme_metrics.prom");
        let cfg = config_for(&dir, out.clone());
        let query = Arc::new(CannedQuery::new().with_device("nvme0", CannedResponse::output(DEVICE_A)));

        let (_tx, rx) = watch::channel(false);
        serve(query, &cfg, rx).await.unwrap();
        assert_eq!(lines_for(&read(&out), "nvme0").len(), 17);
    }

    #[tokio::test]
    async fn test_serve_fails_when_tool_missing() {
        let dir = TempDir::new().unwrap();
        let cfg = config_for(&dir, dir.path().join("nvme_metrics.prom"));
        let query = Arc::new(CannedQuery::new().with_probe_error("nvme: command not found"));

        let (_tx, rx) = watch::channel(false);
        let err = serve(query, &cfg, rx).await.unwrap_err();
        assert!(matches!(err, ExporterError::ToolUnavailable(_)));
    }

    #[tokio::test]
    async fn test_serve_fails_when_output_dir_uncreatable() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let cfg = config_for(&dir, blocker.join("nvme_metrics.prom"));
        let query = Arc::new(CannedQuery::new().with_device("nvme0", CannedResponse::output(DEVICE_A)));

        let (_tx, rx) = watch::channel(false);
        let err = serve(query, &cfg, rx).await.unwrap_err();
        assert!(matches!(err, ExporterError::OutputDir { .. }));
    }
}
