//! Metric family records handed to the exposition layer.
//!
//! The engine never serves metrics itself. A scrape returns a
//! `Vec<MetricFamily>` owned by the caller. [`to_exposition`] converts it to
//! `prometheus` client families and [`encode_text`] renders those in the
//! Prometheus text format.

use std::collections::HashMap;

use prometheus::proto;
use prometheus::{Encoder, TextEncoder};

/// Metric type of a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Gauge,
    Counter,
}

impl MetricType {
    pub fn to_proto(self) -> proto::MetricType {
        match self {
            MetricType::Gauge => proto::MetricType::GAUGE,
            MetricType::Counter => proto::MetricType::COUNTER,
        }
    }
}

/// One fully-labeled observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric_name: String,
    pub label_names: Vec<String>,
    /// Paired with `label_names` by position.
    pub label_values: Vec<String>,
    pub value: f64,
}

impl Sample {
    /// Creates a sample without labels.
    pub fn unlabeled(metric_name: impl Into<String>, value: f64) -> Self {
        Self {
            metric_name: metric_name.into(),
            label_names: Vec::new(),
            label_values: Vec::new(),
            value,
        }
    }

    /// Returns the value of label `name`, if present.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.label_names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.label_values.get(i))
            .map(String::as_str)
    }
}

/// A named group of samples sharing type and help text.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub kind: MetricType,
    pub help: String,
    pub samples: Vec<Sample>,
}

impl MetricFamily {
    pub fn new(name: impl Into<String>, kind: MetricType, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            help: help.into(),
            samples: Vec::new(),
        }
    }

    pub fn with_sample(mut self, sample: Sample) -> Self {
        self.samples.push(sample);
        self
    }
}

const SCRAPE_DURATION_HELP: &str = "Time this SQL scrape took, in seconds.";
const SCRAPE_ERROR_HELP: &str = "Non-zero if this scrape failed.";
const RELOAD_SUCCESS_HELP: &str = "Number of times configuration have successfully been reloaded.";
const RELOAD_FAILURE_HELP: &str = "Number of times configuration have failed to be reloaded.";

pub fn scrape_duration_name(prefix: &str) -> String {
    format!("{}_scrape_duration_seconds", prefix)
}

pub fn scrape_error_name(prefix: &str) -> String {
    format!("{}_scrape_error", prefix)
}

pub fn reload_success_name(prefix: &str) -> String {
    format!("{}_config_reload_success_total", prefix)
}

pub fn reload_failure_name(prefix: &str) -> String {
    format!("{}_config_reload_failure_total", prefix)
}

/// Builds the `<prefix>_scrape_duration_seconds` gauge.
///
/// `None` yields the sample-less shape used for metadata registration.
pub fn scrape_duration(prefix: &str, seconds: Option<f64>) -> MetricFamily {
    synthetic(
        scrape_duration_name(prefix),
        MetricType::Gauge,
        SCRAPE_DURATION_HELP,
        seconds,
    )
}

/// Builds the `<prefix>_scrape_error` gauge (0 or 1).
pub fn scrape_error(prefix: &str, failed: Option<bool>) -> MetricFamily {
    synthetic(
        scrape_error_name(prefix),
        MetricType::Gauge,
        SCRAPE_ERROR_HELP,
        failed.map(|f| if f { 1.0 } else { 0.0 }),
    )
}

/// Builds the reload success and failure counters.
pub fn reload_counters(prefix: &str, success: u64, failure: u64) -> [MetricFamily; 2] {
    [
        synthetic(
            reload_success_name(prefix),
            MetricType::Counter,
            RELOAD_SUCCESS_HELP,
            Some(success as f64),
        ),
        synthetic(
            reload_failure_name(prefix),
            MetricType::Counter,
            RELOAD_FAILURE_HELP,
            Some(failure as f64),
        ),
    ]
}

fn synthetic(name: String, kind: MetricType, help: &str, value: Option<f64>) -> MetricFamily {
    let family = MetricFamily::new(name.clone(), kind, help);
    match value {
        Some(v) => family.with_sample(Sample::unlabeled(name, v)),
        None => family,
    }
}

/// Regroups families into Prometheus client families.
///
/// Exposition formats name a family after its samples, so samples are keyed
/// by `metric_name` here rather than by job. The first family contributing a
/// sample name provides its help text and type. Families without samples
/// produce nothing.
pub fn to_exposition(families: &[MetricFamily]) -> Vec<proto::MetricFamily> {
    let mut exposed: Vec<proto::MetricFamily> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for family in families {
        for sample in &family.samples {
            let slot = *index.entry(sample.metric_name.as_str()).or_insert_with(|| {
                let mut mf = proto::MetricFamily::default();
                mf.set_name(sample.metric_name.clone());
                mf.set_help(family.help.clone());
                mf.set_field_type(family.kind.to_proto());
                exposed.push(mf);
                exposed.len() - 1
            });
            let kind = exposed[slot].get_field_type();
            exposed[slot].mut_metric().push(to_metric(kind, sample));
        }
    }
    exposed
}

fn to_metric(kind: proto::MetricType, sample: &Sample) -> proto::Metric {
    let mut metric = proto::Metric::default();
    for (name, value) in sample.label_names.iter().zip(&sample.label_values) {
        let mut pair = proto::LabelPair::default();
        pair.set_name(name.clone());
        pair.set_value(value.clone());
        metric.mut_label().push(pair);
    }
    match kind {
        proto::MetricType::COUNTER => {
            let mut counter = proto::Counter::default();
            counter.set_value(sample.value);
            metric.set_counter(counter);
        }
        _ => {
            let mut gauge = proto::Gauge::default();
            gauge.set_value(sample.value);
            metric.set_gauge(gauge);
        }
    }
    metric
}

/// Renders families in the Prometheus text exposition format.
pub fn encode_text(families: &[MetricFamily]) -> prometheus::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&to_exposition(families), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
