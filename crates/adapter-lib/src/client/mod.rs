//! Prometheus backend client
//!
//! The rest of the crate only depends on the [`PrometheusClient`] trait.
//! [`QueryClient`] implements it over the HTTP API, and the fake client in
//! [`fake`] backs the test suites.

mod http;
mod types;

#[cfg(any(test, feature = "testing"))]
pub mod fake;

pub use http::{GenericApiClient, HttpApiClient, InstrumentedApiClient, QueryClient};
pub use types::{
    ApiResponse, ErrorType, LabelSet, QueryResult, ResponseStatus, Sample, SamplePair,
    SampleStream, Series, ValueType, METRIC_NAME_LABEL,
};

use crate::error::ClientError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A PromQL series selector or full query expression
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selector(pub String);

impl Selector {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Selector {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for Selector {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// A time interval; open ends are left to the server's defaults
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interval {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Interval {
    /// Everything since `start`
    pub fn since(start: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }
}

/// Parameters of a range query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub step: Option<Duration>,
}

/// Read access to a Prometheus-compatible backend
#[async_trait]
pub trait PrometheusClient: Send + Sync {
    /// List the series matching any of the selectors within the interval
    async fn series(
        &self,
        interval: Interval,
        selectors: &[Selector],
    ) -> Result<Vec<Series>, ClientError>;

    /// Evaluate an instant query, at `time` or at the server's current time
    async fn query(
        &self,
        time: Option<DateTime<Utc>>,
        query: &Selector,
    ) -> Result<QueryResult, ClientError>;

    /// Evaluate a range query
    async fn query_range(&self, range: Range, query: &Selector)
        -> Result<QueryResult, ClientError>;
}

/// Quote a label value the way PromQL string literals expect
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// `label="value"`
pub fn label_eq(label: &str, value: &str) -> String {
    format!("{}={}", label, quote(value))
}

/// `label!="value"`
pub fn label_neq(label: &str, value: &str) -> String {
    format!("{}!={}", label, quote(value))
}

/// `label=~"expr"`
pub fn label_matches(label: &str, expr: &str) -> String {
    format!("{}=~{}", label, quote(expr))
}

/// `label!~"expr"`
pub fn label_not_matches(label: &str, expr: &str) -> String {
    format!("{}!~{}", label, quote(expr))
}

pub fn name_matches(expr: &str) -> String {
    label_matches(METRIC_NAME_LABEL, expr)
}

pub fn name_not_matches(expr: &str) -> String {
    label_not_matches(METRIC_NAME_LABEL, expr)
}

/// Combine a metric name and label matchers into a selector
pub fn match_series(name: &str, label_expressions: &[String]) -> Selector {
    if label_expressions.is_empty() {
        return Selector::new(name);
    }
    Selector(format!("{}{{{}}}", name, label_expressions.join(",")))
}
