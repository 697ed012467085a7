//! Mapping of query result rows to metric samples.

use tracing::{error, warn};

use crate::config::QueryDescriptor;
use crate::driver::{FieldReadError, RowCursor, SqlError};
use crate::metrics::{MetricFamily, MetricType, Sample};

/// Converts a result cursor into metric families.
///
/// Each row yields one sample per value column, named `<prefix>_<query>` and
/// carrying every declared label. A label column that cannot be read becomes
/// an empty string; a value column that cannot be read drops only that
/// sample. All samples of the query are grouped under one family named after
/// the job, so a query with no rows yields no family at all.
///
/// # Errors
/// A failure while advancing the cursor fails the whole query; samples from
/// rows already read are discarded.
pub fn map_rows(
    prefix: &str,
    job_name: &str,
    query: &QueryDescriptor,
    cursor: &mut dyn RowCursor,
) -> Result<Vec<MetricFamily>, SqlError> {
    let metric_name = format!("{}_{}", prefix, query.name);
    let mut samples = Vec::new();

    while cursor.advance()? {
        let label_values: Vec<String> = query
            .labels
            .iter()
            .map(|label| match cursor.read_string(label) {
                Ok(v) => v,
                Err(FieldReadError::Null(_)) => String::new(),
                Err(e) => {
                    warn!(job = %job_name, query = %query.name, label = %label, error = %e,
                        "label not readable from result set");
                    String::new()
                }
            })
            .collect();

        for column in &query.values {
            match cursor.read_float(column) {
                Ok(value) => samples.push(Sample {
                    metric_name: metric_name.clone(),
                    label_names: query.labels.clone(),
                    label_values: label_values.clone(),
                    value,
                }),
                Err(e) => {
                    error!(job = %job_name, query = %query.name, value = %column, error = %e,
                        "sample value not readable from result set");
                }
            }
        }
    }

    if samples.is_empty() {
        return Ok(Vec::new());
    }

    Ok(vec![MetricFamily {
        name: job_name.to_string(),
        kind: MetricType::Gauge,
        help: query.help().to_string(),
        samples,
    }])
}
