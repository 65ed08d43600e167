//! Core library for the Prometheus metrics adapter
//!
//! This crate provides the core functionality for:
//! - Querying the Prometheus HTTP API
//! - Discovering series and exposing them as custom metrics
//! - Translating between series labels and Kubernetes resources
//! - Serving CPU and memory usage as resource metrics
//! - Health checks and observability

pub mod client;
pub mod config;
pub mod custom;
pub mod error;
pub mod health;
pub mod models;
pub mod naming;
pub mod observability;
pub mod resource;

pub use config::{MetricsDiscoveryConfig, ResourceRules};
pub use error::{ClientError, ConfigError, DiscoveryError, ProviderError, QueryError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AdapterMetrics, StructuredLogger};
pub use resource::{MetricsProvider, ResourceMetricsProvider};
