//! End-to-end scrapes against configuration on the real filesystem.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use sqlmetrics::collector::{Collector, CollectorOptions, ReloadCounters};
use sqlmetrics::driver::{MockDriver, MockTable};
use sqlmetrics::fs::RealFs;
use sqlmetrics::metrics::{MetricFamily, encode_text};

const UPTIME: &str = r#"
jobs:
  - name: pg
    connections:
      - { url: "postgres://db1/app", username: exporter, password: secret }
      - { url: "postgres://db2/app", username: exporter, password: secret }
    queries:
      - name: uptime
        help: Seconds since postmaster start
        values: [seconds]
        query_ref: uptime
      - name: tables
        help: Live rows per table
        labels: [relname]
        values: [n_live_tup]
        query: select relname, n_live_tup from pg_stat_user_tables
queries:
  uptime: select extract(epoch from now() - pg_postmaster_start_time()) as seconds
"#;

const BACKENDS: &str = r#"
jobs:
  - name: backends
    connections:
      - { url: "postgres://db1/app", username: exporter, password: secret }
    queries:
      - { name: count, values: [count], query: "select count(*) as count from pg_stat_activity" }
"#;

fn driver() -> MockDriver {
    MockDriver::new()
        .with_rows(
            "select extract(epoch from now() - pg_postmaster_start_time()) as seconds",
            MockTable::new(&["seconds"]).row(&["3600.5"]),
        )
        .with_rows(
            "select relname, n_live_tup from pg_stat_user_tables",
            MockTable::new(&["relname", "n_live_tup"])
                .row(&["users", "10"])
                .row(&["orders", "250"]),
        )
        .with_rows(
            "select count(*) as count from pg_stat_activity",
            MockTable::new(&["count"]).row(&["7"]),
        )
}

/// Replaces `path` atomically with `content`, with the mtime pinned so
/// staleness does not depend on filesystem timestamp granularity.
fn write_at(path: &Path, content: &str, offset_secs: u64) {
    let staging = path.with_extension("staging");
    fs::write(&staging, content).unwrap();
    let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + offset_secs);
    File::options()
        .write(true)
        .open(&staging)
        .unwrap()
        .set_modified(mtime)
        .unwrap();
    fs::rename(&staging, path).unwrap();
}

fn family<'a>(families: &'a [MetricFamily], name: &str) -> Vec<&'a MetricFamily> {
    families.iter().filter(|f| f.name == name).collect()
}

#[test]
fn scrape_and_reload_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sqlmetrics.yml");
    write_at(&path, UPTIME, 0);

    let mock = driver();
    let collector = Collector::with_parts(RealFs::new(), mock.clone(), &path, CollectorOptions::default())
        .unwrap()
        .with_counters(Arc::new(ReloadCounters::new()));

    let families = collector.collect();
    let pg = family(&families, "pg");
    // Two queries on two connections.
    assert_eq!(pg.len(), 4);
    assert_eq!(pg[0].help, "Seconds since postmaster start");
    assert_eq!(pg[0].samples[0].metric_name, "jdbc_uptime");
    assert_eq!(pg[0].samples[0].value, 3600.5);
    assert_eq!(pg[1].samples.len(), 2);
    assert_eq!(pg[1].samples[1].label("relname"), Some("orders"));
    assert_eq!(mock.opened(), 2);
    assert_eq!(mock.closed(), 2);

    write_at(&path, BACKENDS, 10);
    let families = collector.collect();
    assert!(family(&families, "pg").is_empty());
    assert_eq!(family(&families, "backends")[0].samples[0].value, 7.0);
    assert_eq!(collector.reload_counters().success(), 1);

    write_at(&path, "jobs:\n  - name: broken\n", 20);
    let families = collector.collect();
    assert_eq!(family(&families, "backends").len(), 1);
    assert_eq!(collector.reload_counters().failure(), 1);

    let text = encode_text(&families).unwrap();
    assert!(text.contains("# TYPE jdbc_count gauge\n"));
    assert!(text.contains("jdbc_count 7\n"));
    assert!(text.contains("jdbc_scrape_error 0\n"));
    assert!(text.contains("jdbc_config_reload_failure_total 1\n"));
}

#[test]
fn directory_with_invalid_files() {
    let dir = tempfile::tempdir().unwrap();
    write_at(&dir.path().join("10-uptime.yml"), UPTIME, 0);
    write_at(&dir.path().join("20-backends.yml"), BACKENDS, 0);
    write_at(&dir.path().join("30-broken.yml"), "jobs: [", 0);
    fs::create_dir(dir.path().join("nested")).unwrap();

    let collector = Collector::with_parts(
        RealFs::new(),
        driver(),
        dir.path(),
        CollectorOptions::default(),
    )
    .unwrap()
    .with_counters(Arc::new(ReloadCounters::new()));
    assert_eq!(collector.snapshot().models().len(), 2);

    let families = collector.collect();
    assert_eq!(family(&families, "pg").len(), 4);
    assert_eq!(family(&families, "backends").len(), 1);
    assert_eq!(family(&families, "jdbc_scrape_duration_seconds").len(), 1);
}

#[test]
fn directory_without_valid_files_fails_construction() {
    let dir = tempfile::tempdir().unwrap();
    write_at(&dir.path().join("broken.yml"), "queries: {}\n", 0);

    let err = Collector::with_parts(
        RealFs::new(),
        driver(),
        dir.path(),
        CollectorOptions::default(),
    )
    .err()
    .expect("construction should fail");
    assert!(err.to_string().contains(&dir.path().display().to_string()));
}

#[test]
fn concurrent_scrapes_during_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sqlmetrics.yml");
    write_at(&path, UPTIME, 0);

    let collector = Collector::with_parts(RealFs::new(), driver(), &path, CollectorOptions::default())
        .unwrap()
        .with_counters(Arc::new(ReloadCounters::new()));

    std::thread::scope(|s| {
        let workers: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|| {
                    for _ in 0..20 {
                        let families = collector.collect();
                        let pg = family(&families, "pg").len();
                        let backends = family(&families, "backends").len();
                        // Each scrape sees exactly one generation.
                        assert!(
                            (pg == 4 && backends == 0) || (pg == 0 && backends == 1),
                            "torn scrape: pg={} backends={}",
                            pg,
                            backends
                        );
                    }
                })
            })
            .collect();

        write_at(&path, BACKENDS, 10);
        for worker in workers {
            worker.join().unwrap();
        }
    });

    let families = collector.collect();
    assert_eq!(family(&families, "backends").len(), 1);
}
