//! Scrape-facing facade: owns the loaded configuration and reloads it when
//! its source changes.
//!
//! The current configuration lives in an immutable [`Snapshot`] behind an
//! `ArcSwap`. A scrape loads the pointer once and runs entirely against that
//! snapshot, so a reload happening in parallel never tears a scrape between
//! two generations. A failed reload leaves the previous snapshot in place, and
//! a reload overtaken by a newer one is discarded.
//!
//! `Collector` also implements `prometheus::core::Collector`, so it can be
//! registered with a `prometheus::Registry` as is.
//!
//! ```text
//!            collect()
//!               │
//!     source mtime > snapshot stamp? ──no──┐
//!               │ yes                      │
//!          reload_config()                 │
//!        ok ┌───┴───┐ err                  │
//!     swap  │       │ keep old             │
//!  success++│       │ failure++            │
//!           └───┬───┘                      │
//!               ▼                          ▼
//!        run_jobs(snapshot) + synthetic metrics
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Instant, SystemTime};

use arc_swap::ArcSwap;
use prometheus::core::{Collector as MetricCollector, Desc};
use prometheus::proto;
use tracing::{debug, error, info, warn};

use crate::config::{self, ConfigError, ConfigModel};
use crate::driver::{PostgresDriver, SqlDriver};
use crate::executor::run_jobs;
use crate::fs::{FileSystem, RealFs, source_modified};
use crate::metrics::{self, MetricFamily};

/// Default metric namespace prefix.
pub const DEFAULT_PREFIX: &str = "jdbc";

/// Tunables of a [`Collector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorOptions {
    /// Namespace of per-query sample names and of the synthetic metrics.
    pub prefix: String,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

/// Monotonic configuration reload counters.
#[derive(Debug, Default)]
pub struct ReloadCounters {
    success: AtomicU64,
    failure: AtomicU64,
}

static GLOBAL_RELOAD_COUNTERS: OnceLock<Arc<ReloadCounters>> = OnceLock::new();

impl ReloadCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide counters, shared by every collector built without
    /// explicit counters. Never reset.
    pub fn global() -> Arc<ReloadCounters> {
        GLOBAL_RELOAD_COUNTERS
            .get_or_init(|| Arc::new(ReloadCounters::new()))
            .clone()
    }

    pub fn success(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }

    pub fn failure(&self) -> u64 {
        self.failure.load(Ordering::Relaxed)
    }

    fn record_success(&self) {
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failure.fetch_add(1, Ordering::Relaxed);
    }
}

/// One generation of loaded configuration.
#[derive(Debug)]
pub struct Snapshot {
    models: Vec<ConfigModel>,
    /// Source modification time this generation was loaded from.
    source_modified: Option<SystemTime>,
}

impl Snapshot {
    pub fn models(&self) -> &[ConfigModel] {
        &self.models
    }

    pub fn source_modified(&self) -> Option<SystemTime> {
        self.source_modified
    }
}

/// Collector facade consumed by the exposition layer.
///
/// # Usage
///
/// ```ignore
/// use sqlmetrics::collector::{Collector, CollectorOptions};
///
/// let collector = Collector::from_path("/etc/sqlmetrics.yml", CollectorOptions::default())?;
/// let families = collector.collect();
/// ```
pub struct Collector<F: FileSystem = RealFs, D: SqlDriver = PostgresDriver> {
    fs: F,
    driver: D,
    /// Backing file or directory; `None` for in-memory configuration.
    path: Option<PathBuf>,
    options: CollectorOptions,
    current: ArcSwap<Snapshot>,
    counters: Arc<ReloadCounters>,
    /// Descriptors of the synthetic gauges, for registry registration.
    descs: Vec<Desc>,
}

impl Collector {
    /// Creates a collector over the real filesystem and PostgreSQL.
    pub fn from_path(
        path: impl Into<PathBuf>,
        options: CollectorOptions,
    ) -> Result<Self, ConfigError> {
        Self::with_parts(RealFs::new(), PostgresDriver::new(), path, options)
    }
}

impl<D: SqlDriver> Collector<RealFs, D> {
    /// Creates a collector from a YAML document held in memory.
    ///
    /// The configuration has no backing source, so it is never reloaded.
    pub fn from_yaml_str(
        driver: D,
        yaml: &str,
        options: CollectorOptions,
    ) -> Result<Self, ConfigError> {
        let model = config::load_str(yaml)?;
        let descs = descriptors(&options.prefix)?;
        Ok(Self {
            fs: RealFs::new(),
            driver,
            path: None,
            options,
            current: ArcSwap::from_pointee(Snapshot {
                models: vec![model],
                source_modified: None,
            }),
            counters: ReloadCounters::global(),
            descs,
        })
    }
}

impl<F: FileSystem, D: SqlDriver> Collector<F, D> {
    /// Creates a collector backed by a configuration file or directory.
    ///
    /// # Errors
    /// Any load failure is returned; there is no previous configuration to
    /// fall back to at construction time.
    pub fn with_parts(
        fs: F,
        driver: D,
        path: impl Into<PathBuf>,
        options: CollectorOptions,
    ) -> Result<Self, ConfigError> {
        let path = path.into();
        let descs = descriptors(&options.prefix)?;
        let snapshot = load_snapshot(&fs, &path)?;
        info!(
            path = %path.display(),
            models = snapshot.models.len(),
            "configuration loaded"
        );
        Ok(Self {
            fs,
            driver,
            path: Some(path),
            options,
            current: ArcSwap::from_pointee(snapshot),
            counters: ReloadCounters::global(),
            descs,
        })
    }

    /// Uses `counters` instead of the process-wide reload counters.
    pub fn with_counters(mut self, counters: Arc<ReloadCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn options(&self) -> &CollectorOptions {
        &self.options
    }

    pub fn reload_counters(&self) -> &ReloadCounters {
        &self.counters
    }

    /// Returns the configuration generation currently served.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Metric families that every scrape emits, without samples.
    pub fn describe(&self) -> Vec<MetricFamily> {
        let prefix = &self.options.prefix;
        vec![
            metrics::scrape_duration(prefix, None),
            metrics::scrape_error(prefix, None),
        ]
    }

    /// Runs one scrape.
    ///
    /// Reloads the configuration first if its source changed, then runs every
    /// job of every loaded model. Never fails: data-source problems show up as
    /// missing samples, and unreachable sources or aborted jobs in
    /// `<prefix>_scrape_error`.
    pub fn collect(&self) -> Vec<MetricFamily> {
        let start = Instant::now();

        let observed = self.current.load_full();
        if self.is_stale(&observed) {
            debug!("configuration source changed, reloading");
            // Failures are logged and counted by reload_over.
            let _ = self.reload_over(&observed);
        }

        let snapshot = self.current.load_full();
        let run = run_jobs(&self.driver, &self.options.prefix, snapshot.models());

        let prefix = &self.options.prefix;
        let mut families = run.families;
        families.push(metrics::scrape_duration(
            prefix,
            Some(start.elapsed().as_secs_f64()),
        ));
        families.push(metrics::scrape_error(prefix, Some(run.had_error)));
        families.extend(metrics::reload_counters(
            prefix,
            self.counters.success(),
            self.counters.failure(),
        ));
        families
    }

    /// Reloads the configuration from its source.
    ///
    /// On success the new generation replaces the current one and the success
    /// counter is incremented, unless a concurrent reload already installed a
    /// newer generation. On failure the current generation stays in place and
    /// the failure counter is incremented. In-memory configuration has nothing
    /// to reload.
    pub fn reload_config(&self) -> Result<(), ConfigError> {
        let observed = self.current.load_full();
        self.reload_over(&observed)
    }

    /// Reloads the source, replacing `observed` with the result.
    fn reload_over(&self, observed: &Arc<Snapshot>) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let snapshot = match load_snapshot(&self.fs, path) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.counters.record_failure();
                error!(path = %path.display(), error = %e, "configuration reload failed");
                return Err(e);
            }
        };

        let models = snapshot.models.len();
        if self.install(observed, snapshot) {
            self.counters.record_success();
            info!(path = %path.display(), models, "configuration reloaded");
        } else {
            debug!(path = %path.display(), "newer configuration already installed, discarding reload");
        }
        Ok(())
    }

    /// Swaps in `snapshot` if the current generation is still `observed`, or
    /// if `snapshot` was loaded from a strictly newer source.
    fn install(&self, observed: &Arc<Snapshot>, snapshot: Snapshot) -> bool {
        let snapshot = Arc::new(snapshot);
        let mut installed = false;
        self.current.rcu(|current| {
            installed = Arc::ptr_eq(current, observed)
                || snapshot.source_modified > current.source_modified;
            if installed {
                Arc::clone(&snapshot)
            } else {
                Arc::clone(current)
            }
        });
        installed
    }

    /// Whether the source changed since `loaded` was loaded.
    fn is_stale(&self, loaded: &Snapshot) -> bool {
        let Some(path) = &self.path else {
            return false;
        };
        match source_modified(&self.fs, path) {
            Ok(modified) => loaded
                .source_modified
                .is_none_or(|stamp| modified > stamp),
            Err(e) => {
                warn!(path = %path.display(), error = %e,
                    "configuration source not accessible, keeping current configuration");
                false
            }
        }
    }
}

impl<F: FileSystem, D: SqlDriver> MetricCollector for Collector<F, D> {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<proto::MetricFamily> {
        metrics::to_exposition(&Collector::collect(self))
    }
}

fn descriptors(prefix: &str) -> Result<Vec<Desc>, ConfigError> {
    [
        metrics::scrape_duration(prefix, None),
        metrics::scrape_error(prefix, None),
    ]
    .into_iter()
    .map(|family| {
        Desc::new(family.name, family.help, Vec::new(), HashMap::new()).map_err(|source| {
            ConfigError::InvalidPrefix {
                prefix: prefix.to_string(),
                source,
            }
        })
    })
    .collect()
}

fn load_snapshot<F: FileSystem + ?Sized>(fs: &F, path: &Path) -> Result<Snapshot, ConfigError> {
    // Stamp first: an edit landing during the load is seen as a newer change.
    let stamp = source_modified(fs, path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let models = config::load_path(fs, path)?;
    Ok(Snapshot {
        models,
        source_modified: Some(stamp),
    })
}
