//! Resource naming: kinds, label conversion and query templates

mod converter;
mod mapper;
mod query;
mod template;

pub use converter::{LabelResourceConverter, ResourceConverter};
pub use mapper::{KindInfo, KindRegistry, ResourceMapper, ScopeInfo};
pub use query::{MetricsQuery, TemplatedMetricsQuery};
pub use template::{Template, TemplateData, TemplateError, Value};
