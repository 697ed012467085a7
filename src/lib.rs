//! sqlmetrics - configuration-driven SQL metrics collection.
//!
//! Turns a YAML description of SQL queries against one or more databases
//! into labeled metric samples, once per scrape:
//! - `config` - configuration model, loading and validation
//! - `catalog` - shared named queries referenced via `query_ref`
//! - `driver` - SQL capability (PostgreSQL and an in-memory mock)
//! - `executor` / `mapper` - running jobs and mapping rows to samples
//! - `collector` - scrape facade with hot reload of the configuration
//! - `metrics` - metric family records and text exposition
//! - `fs` - configuration source access (real and mock filesystem)

pub mod catalog;
pub mod collector;
pub mod config;
pub mod driver;
pub mod executor;
pub mod fs;
pub mod mapper;
pub mod metrics;

pub use collector::{Collector, CollectorOptions, ReloadCounters};
pub use metrics::{MetricFamily, MetricType, Sample};
