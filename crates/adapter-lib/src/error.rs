//! Error taxonomy for the adapter
//!
//! Configuration errors are fatal at startup. Resolution and naming errors
//! are per-call and usually logged and skipped. Discovery errors abort a
//! single refresh cycle. Query errors surface to the immediate caller.
//! `ProviderError` is what API consumers see: everything collapses into
//! not-found or internal.

use thiserror::Error;

use crate::client::{ErrorType, Selector, ValueType};
use crate::models::GroupResource;
use crate::naming::TemplateError;

/// A malformed discovery or resource rule
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot have both an `is` ({is:?}) and `isNot` ({is_not:?}) expression in a single filter")]
    ConflictingFilter { is: String, is_not: String },

    #[error("must have either an `is` or `isNot` expression in a filter")]
    EmptyFilter,

    #[error("unable to compile regular expression {pattern:?}: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unable to parse template {template:?}: {source}")]
    Template {
        template: String,
        #[source]
        source: TemplateError,
    },

    #[error("unable to convert label template {template:?} to matcher: {reason}")]
    LabelMatcher { template: String, reason: String },

    #[error("unable to normalize resource override {label:?}: {source}")]
    Override {
        label: String,
        #[source]
        source: ResolutionError,
    },

    #[error("must specify an 'as' value for name matcher {matches:?}")]
    AmbiguousName { matches: String },

    #[error("invalid rule for series query {series_query:?}: {source}")]
    Rule {
        series_query: String,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("invalid {which} resource rule: {source}")]
    ResourceRule {
        which: &'static str,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("unable to read metrics discovery config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to parse metrics discovery config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// A resource identity or label that could not be resolved
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("no kind registered for resource {0}")]
    UnknownResource(GroupResource),

    #[error("no generic resource label form specified for this metric")]
    NoLabelTemplate,

    #[error("empty label produced by label template for resource {0}")]
    EmptyLabel(GroupResource),

    #[error("unable to render label for resource {resource}: {source}")]
    Template {
        resource: GroupResource,
        #[source]
        source: TemplateError,
    },
}

/// A series whose name could not be turned into a metric name
#[derive(Debug, Error, Clone, PartialEq)]
#[error("series name {series:?} did not match expected pattern {pattern:?}")]
pub struct NamingError {
    pub series: String,
    pub pattern: String,
}

/// Errors talking to the Prometheus HTTP API
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("unable to construct request to Prometheus: {0}")]
    Request(String),

    #[error("error sending request to Prometheus: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{kind}: {message}")]
    Api { kind: ErrorType, message: String },

    #[error("unable to decode Prometheus response data: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ClientError {
    /// Errors reported by Prometheus itself, as opposed to transport failures
    pub fn is_api_error(&self) -> bool {
        matches!(self, ClientError::Api { .. })
    }
}

/// A refresh cycle that could not complete
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("unable to fetch metrics for query {selector}: {source}")]
    Fetch {
        selector: Selector,
        #[source]
        source: ClientError,
    },

    #[error("no metrics retrieved for query {0}")]
    MissingSelector(Selector),

    #[error("series discovery task failed: {0}")]
    Task(String),

    #[error("need one set of series per namer (got {series} for {namers} namers)")]
    Mismatch { series: usize, namers: usize },
}

/// Building or executing a backend query failed
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("unable to find label for resource {resource}: {source}")]
    Resolution {
        resource: GroupResource,
        #[source]
        source: ResolutionError,
    },

    #[error("unable to render metrics query: {0}")]
    Template(#[source] TemplateError),

    #[error("empty query produced by metrics query template")]
    EmptyQuery,

    #[error("no resource names given for query")]
    NoResourceNames,

    #[error("unable to execute query: {0}")]
    Client(#[from] ClientError),

    #[error("invalid or empty value of non-vector type ({0}) returned")]
    NonVector(ValueType),
}

/// Errors visible to consumers of the metrics APIs
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    #[error("the server could not find the metric {metric} for {resource}")]
    MetricNotFound {
        resource: GroupResource,
        metric: String,
    },

    #[error("the server could not find the metric {metric} for {resource} {name}")]
    MetricNotFoundFor {
        resource: GroupResource,
        metric: String,
        name: String,
    },

    #[error("Internal error occurred: {0}")]
    Internal(String),
}

impl ProviderError {
    pub fn not_found(resource: &GroupResource, metric: &str) -> Self {
        ProviderError::MetricNotFound {
            resource: resource.clone(),
            metric: metric.to_string(),
        }
    }

    pub fn not_found_for(resource: &GroupResource, metric: &str, name: &str) -> Self {
        ProviderError::MetricNotFoundFor {
            resource: resource.clone(),
            metric: metric.to_string(),
            name: name.to_string(),
        }
    }

    /// HTTP status code for the error
    pub fn status_code(&self) -> u16 {
        match self {
            ProviderError::MetricNotFound { .. } | ProviderError::MetricNotFoundFor { .. } => 404,
            ProviderError::Internal(_) => 500,
        }
    }

    /// Kubernetes `Status` reason for the error
    pub fn reason(&self) -> &'static str {
        match self {
            ProviderError::MetricNotFound { .. } | ProviderError::MetricNotFoundFor { .. } => {
                "NotFound"
            }
            ProviderError::Internal(_) => "InternalError",
        }
    }
}
