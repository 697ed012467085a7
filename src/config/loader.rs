//! Parsing and validation of configuration documents.
//!
//! Documents are first decoded into a permissive raw model where every field
//! is optional, then validated in a fixed order so the first problem found is
//! always the same one for a given document.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{
    ConfigError, ConfigModel, ConnectionDescriptor, JobDescriptor, QueryDescriptor, QueryText,
};
use crate::catalog::QueryCatalog;
use crate::fs::FileSystem;

#[derive(Debug, Default, Deserialize)]
struct RawDocument {
    jobs: Option<Vec<RawJob>>,
    queries: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawJob {
    name: Option<String>,
    connections: Option<Vec<RawConnection>>,
    queries: Option<Vec<RawQuery>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawConnection {
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawQuery {
    name: Option<String>,
    help: Option<String>,
    labels: Option<Vec<String>>,
    values: Option<Vec<String>>,
    query: Option<String>,
    query_ref: Option<String>,
}

/// Builds a configuration model from YAML text.
///
/// The result has no `last_update` or `origin`; see [`load_path`] for
/// file-backed configuration.
pub fn load_str(text: &str) -> Result<ConfigModel, ConfigError> {
    let value: serde_yaml::Value = serde_yaml::from_str(text)?;
    if value.is_null() {
        warn!("config document is empty");
        return Err(ConfigError::JobsNotDefined);
    }
    let raw: RawDocument = serde_yaml::from_value(value)?;
    validate(raw)
}

/// Loads every configuration model found at `path`.
///
/// A file yields exactly one model or an error naming the file. A directory
/// yields one model per regular file that loads successfully, in path order;
/// files that fail are skipped with a warning. A directory with no valid file
/// is an error.
pub fn load_path<F: FileSystem + ?Sized>(
    fs: &F,
    path: &Path,
) -> Result<Vec<ConfigModel>, ConfigError> {
    if !fs.is_dir(path) {
        let model = load_file(fs, path).map_err(|e| ConfigError::InFile {
            path: path.to_path_buf(),
            source: Box::new(e),
        })?;
        return Ok(vec![model]);
    }

    let mut files: Vec<PathBuf> = fs
        .read_dir(path)
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .into_iter()
        .filter(|p| fs.is_file(p))
        .collect();
    files.sort();

    let mut models = Vec::with_capacity(files.len());
    for file in &files {
        match load_file(fs, file) {
            Ok(model) => models.push(model),
            Err(e) => {
                warn!(file = %file.display(), error = %e, "skipping invalid configuration file");
            }
        }
    }

    if models.is_empty() {
        return Err(ConfigError::NoValidConfig {
            path: path.to_path_buf(),
        });
    }

    debug!(
        dir = %path.display(),
        loaded = models.len(),
        skipped = files.len() - models.len(),
        "configuration directory loaded"
    );
    Ok(models)
}

fn load_file<F: FileSystem + ?Sized>(fs: &F, path: &Path) -> Result<ConfigModel, ConfigError> {
    let io_err = |source: std::io::Error| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    // Stat before reading: an edit racing the read leaves the older stamp.
    let modified = fs.modified(path).map_err(io_err)?;
    let text = fs.read_to_string(path).map_err(io_err)?;

    let mut model = load_str(&text)?;
    model.last_update = Some(DateTime::<Utc>::from(modified));
    model.origin = Some(path.to_path_buf());
    Ok(model)
}

fn validate(raw: RawDocument) -> Result<ConfigModel, ConfigError> {
    let catalog: QueryCatalog = raw.queries.unwrap_or_default().into_iter().collect();

    let raw_jobs = raw.jobs.ok_or(ConfigError::JobsNotDefined)?;
    if raw_jobs.is_empty() {
        return Err(ConfigError::EmptyList {
            location: "document".to_string(),
            field: "jobs",
        });
    }

    let jobs = raw_jobs
        .into_iter()
        .enumerate()
        .map(|(i, job)| validate_job(i, job, &catalog))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ConfigModel {
        jobs,
        catalog,
        last_update: None,
        origin: None,
    })
}

fn validate_job(
    index: usize,
    raw: RawJob,
    catalog: &QueryCatalog,
) -> Result<JobDescriptor, ConfigError> {
    let location = format!("jobs[{}]", index);

    let name = required(raw.name, &location, "name")?;

    let raw_connections = non_empty(raw.connections, &location, "connections")?;
    let connections = raw_connections
        .into_iter()
        .enumerate()
        .map(|(i, conn)| -> Result<ConnectionDescriptor, ConfigError> {
            let location = format!("{}.connections[{}]", location, i);
            Ok(ConnectionDescriptor {
                url: required(conn.url, &location, "url")?,
                username: required(conn.username, &location, "username")?,
                password: required(conn.password, &location, "password")?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let raw_queries = non_empty(raw.queries, &location, "queries")?;
    let queries = raw_queries
        .into_iter()
        .enumerate()
        .map(|(i, query)| validate_query(&format!("{}.queries[{}]", location, i), query, catalog))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(JobDescriptor {
        name,
        connections,
        queries,
    })
}

fn validate_query(
    location: &str,
    raw: RawQuery,
    catalog: &QueryCatalog,
) -> Result<QueryDescriptor, ConfigError> {
    let name = required(raw.name, location, "name")?;
    let values = non_empty(raw.values, location, "values")?;

    let text = match (raw.query, raw.query_ref) {
        (Some(_), Some(_)) => {
            return Err(ConfigError::QueryAndQueryRef {
                location: location.to_string(),
            });
        }
        (None, None) => {
            return Err(ConfigError::NoQuery {
                location: location.to_string(),
            });
        }
        (Some(sql), None) => QueryText::Inline(sql),
        (None, Some(reference)) => match catalog.resolve(&reference) {
            Some(sql) => QueryText::Ref {
                sql: sql.to_string(),
                name: reference,
            },
            None => {
                return Err(ConfigError::UnknownQueryRef {
                    location: location.to_string(),
                    name: reference,
                });
            }
        },
    };

    Ok(QueryDescriptor {
        name,
        help: raw.help,
        labels: raw.labels.unwrap_or_default(),
        values,
        text,
    })
}

fn required<T>(value: Option<T>, location: &str, field: &'static str) -> Result<T, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingField {
        location: location.to_string(),
        field,
    })
}

fn non_empty<T>(
    value: Option<Vec<T>>,
    location: &str,
    field: &'static str,
) -> Result<Vec<T>, ConfigError> {
    let list = required(value, location, field)?;
    if list.is_empty() {
        return Err(ConfigError::EmptyList {
            location: location.to_string(),
            field,
        });
    }
    Ok(list)
}
