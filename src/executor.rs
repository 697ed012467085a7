//! Execution of configured jobs against their data sources.
//!
//! Failures are isolated per unit, innermost first:
//! - a query that fails to execute or iterate is logged and skipped;
//! - a connection that fails to open is logged and skipped, and flags the scrape;
//! - a job that panics is logged and flags the scrape as failed.
//!
//! Nothing below [`run_jobs`] can abort a scrape. Every opened connection is
//! closed after its queries, and released by drop if the job unwinds.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::{ConfigModel, JobDescriptor, QueryDescriptor};
use crate::driver::{SqlConnection, SqlDriver, SqlError};
use crate::mapper::map_rows;
use crate::metrics::MetricFamily;

/// Result of running every job of a set of configuration models.
#[derive(Debug, Clone, Default)]
pub struct ScrapeRun {
    /// Families in model order, then job, connection and query order.
    pub families: Vec<MetricFamily>,
    pub duration: Duration,
    /// `true` if any job ended unexpectedly or could not reach a data source.
    pub had_error: bool,
}

/// Outcome of a single job.
#[derive(Debug, Default)]
struct JobRun {
    families: Vec<MetricFamily>,
    failed_connections: usize,
}

/// Runs all jobs of all `models`, one after another on the calling thread.
pub fn run_jobs(driver: &dyn SqlDriver, prefix: &str, models: &[ConfigModel]) -> ScrapeRun {
    let start = Instant::now();
    let mut run = ScrapeRun::default();

    for model in models {
        for job in &model.jobs {
            match panic::catch_unwind(AssertUnwindSafe(|| run_job(driver, prefix, job))) {
                Ok(job_run) => {
                    run.had_error |= job_run.failed_connections > 0;
                    run.families.extend(job_run.families);
                }
                Err(payload) => {
                    error!(job = %job.name, cause = %panic_message(payload.as_ref()),
                        "job aborted unexpectedly");
                    run.had_error = true;
                }
            }
        }
    }

    run.duration = start.elapsed();
    run
}

/// Runs every query of `job` on every one of its connections.
fn run_job(driver: &dyn SqlDriver, prefix: &str, job: &JobDescriptor) -> JobRun {
    info!(job = %job.name, "running job");
    let mut job_run = JobRun::default();

    for descriptor in &job.connections {
        let url = descriptor.redacted_url();
        info!(job = %job.name, url = %url, "connecting");
        let mut connection = match driver.connect(descriptor) {
            Ok(c) => c,
            Err(e) => {
                error!(job = %job.name, url = %url, error = %e,
                    "error connecting to database");
                job_run.failed_connections += 1;
                continue;
            }
        };

        for query in &job.queries {
            match run_query(connection.as_mut(), prefix, &job.name, query) {
                Ok(produced) => {
                    debug!(job = %job.name, query = %query.name, families = produced.len(),
                        "query done");
                    job_run.families.extend(produced);
                }
                Err(e) => {
                    error!(job = %job.name, query = %query.name, sql = %query.sql(), error = %e,
                        "error executing query");
                }
            }
        }

        if let Err(e) = connection.close() {
            warn!(job = %job.name, url = %url, error = %e, "error closing connection");
        }
    }

    job_run
}

fn run_query(
    connection: &mut dyn SqlConnection,
    prefix: &str,
    job_name: &str,
    query: &QueryDescriptor,
) -> Result<Vec<MetricFamily>, SqlError> {
    let mut cursor = connection.query(query.sql())?;
    map_rows(prefix, job_name, query, cursor.as_mut())
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
