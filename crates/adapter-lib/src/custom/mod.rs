//! Custom metrics: discovery rules, the metric registry and the provider
//!
//! Flow: every [`MetricNamer`] contributes a selector; the
//! [`CachingMetricsLister`] lists the matching series periodically and
//! feeds them into the [`SeriesRegistry`], which the
//! [`PrometheusProvider`] consults to build queries.

mod filter;
mod lister;
mod namer;
mod provider;
mod registry;


pub use filter::{FilterChain, SeriesFilter};
pub use lister::{CachingMetricsLister, ListerConfig};
pub use namer::{namers_from_config, MetricNamer, RuleNamer};
pub use provider::{CustomMetricsProvider, ObjectLister, PrometheusProvider};
pub use registry::{BasicSeriesRegistry, SeriesRegistry};
