//! Wire types of the Prometheus HTTP API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Label holding the metric name in a raw label set
pub const METRIC_NAME_LABEL: &str = "__name__";

/// A label set
pub type LabelSet = BTreeMap<String, String>;

/// A discovered series: its name plus all remaining labels
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "LabelSet")]
pub struct Series {
    pub name: String,
    pub labels: LabelSet,
}

impl Series {
    pub fn new(name: impl Into<String>, labels: LabelSet) -> Self {
        Self {
            name: name.into(),
            labels,
        }
    }
}

impl From<LabelSet> for Series {
    fn from(mut labels: LabelSet) -> Self {
        let name = labels.remove(METRIC_NAME_LABEL).unwrap_or_default();
        Self { name, labels }
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<String> = self
            .labels
            .iter()
            .map(|(k, v)| format!("{}={:?}", k, v))
            .collect();
        write!(f, "{}{{{}}}", self.name, labels.join(","))
    }
}

/// A timestamped value as encoded by Prometheus: `[1435781451.781, "1"]`
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "(f64, String)")]
pub struct SamplePair {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl TryFrom<(f64, String)> for SamplePair {
    type Error = String;

    fn try_from((ts, raw): (f64, String)) -> Result<Self, Self::Error> {
        let timestamp = DateTime::<Utc>::from_timestamp_millis((ts * 1000.0).round() as i64)
            .ok_or_else(|| format!("timestamp {} out of range", ts))?;
        let value = raw
            .parse::<f64>()
            .map_err(|e| format!("invalid sample value {:?}: {}", raw, e))?;
        Ok(Self { timestamp, value })
    }
}

/// One element of an instant vector
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawSample")]
pub struct Sample {
    pub metric: LabelSet,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawSample {
    #[serde(default)]
    metric: LabelSet,
    value: SamplePair,
}

impl From<RawSample> for Sample {
    fn from(raw: RawSample) -> Self {
        Self {
            metric: raw.metric,
            value: raw.value.value,
            timestamp: raw.value.timestamp,
        }
    }
}

/// One series of a range vector
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SampleStream {
    #[serde(default)]
    pub metric: LabelSet,
    pub values: Vec<SamplePair>,
}

/// Discriminant of a query result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Scalar,
    Vector,
    Matrix,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Scalar => "scalar",
            ValueType::Vector => "vector",
            ValueType::Matrix => "matrix",
        };
        f.write_str(name)
    }
}

/// Result of an instant or range query, tagged by `resultType`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
pub enum QueryResult {
    Scalar(SamplePair),
    Vector(Vec<Sample>),
    Matrix(Vec<SampleStream>),
}

impl QueryResult {
    pub fn value_type(&self) -> ValueType {
        match self {
            QueryResult::Scalar(_) => ValueType::Scalar,
            QueryResult::Vector(_) => ValueType::Vector,
            QueryResult::Matrix(_) => ValueType::Matrix,
        }
    }

    /// The samples of a vector result, or the actual type otherwise
    pub fn into_vector(self) -> Result<Vec<Sample>, ValueType> {
        match self {
            QueryResult::Vector(samples) => Ok(samples),
            other => Err(other.value_type()),
        }
    }
}

/// Error classes reported in the `errorType` field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    BadData,
    Timeout,
    Canceled,
    Execution,
    BadResponse,
    Internal,
    Unavailable,
    NotFound,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorType::BadData => "bad_data",
            ErrorType::Timeout => "timeout",
            ErrorType::Canceled => "canceled",
            ErrorType::Execution => "execution",
            ErrorType::BadResponse => "bad_response",
            ErrorType::Internal => "internal",
            ErrorType::Unavailable => "unavailable",
            ErrorType::NotFound => "not_found",
            ErrorType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    #[serde(alias = "succeeded")]
    Success,
    Error,
}

/// The envelope every API response is wrapped in
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse {
    pub status: ResponseStatus,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, rename = "errorType")]
    pub error_type: Option<ErrorType>,
    #[serde(default)]
    pub error: String,
}
