//! Rendering of backend queries for a set of resource names

use std::collections::BTreeMap;
use std::sync::Arc;

use super::converter::ResourceConverter;
use super::template::{Template, TemplateData, Value};
use crate::client::{label_eq, label_matches, Selector};
use crate::error::{ConfigError, QueryError};
use crate::models::GroupResource;

/// Builds the query that fetches a series for specific objects
pub trait MetricsQuery: Send + Sync {
    /// `names` must not be empty. `namespace` is empty for cluster-wide
    /// queries.
    fn build(
        &self,
        series: &str,
        resource: &GroupResource,
        namespace: &str,
        extra_group_by: &[String],
        names: &[String],
    ) -> Result<Selector, QueryError>;
}

/// Variables available to a metrics query template
struct QueryTemplateArgs {
    series: String,
    label_matchers: String,
    label_values_by_name: BTreeMap<String, Vec<String>>,
    group_by: Vec<String>,
}

impl TemplateData for QueryTemplateArgs {
    fn field(&self, name: &str) -> Option<Value> {
        let value = match name {
            "Series" => Value::Str(self.series.clone()),
            "LabelMatchers" => Value::Str(self.label_matchers.clone()),
            "LabelValuesByName" => Value::Map(self.label_values_by_name.clone()),
            "GroupBy" => Value::Str(self.group_by.join(",")),
            "GroupBySlice" => Value::List(self.group_by.clone()),
            _ => return None,
        };
        Some(value)
    }
}

/// [`MetricsQuery`] rendering a `<<`/`>>` delimited template
pub struct TemplatedMetricsQuery {
    converter: Arc<dyn ResourceConverter>,
    template: Template,
}

impl TemplatedMetricsQuery {
    pub fn new(
        query_template: &str,
        converter: Arc<dyn ResourceConverter>,
    ) -> Result<Self, ConfigError> {
        let template = Template::parse(query_template).map_err(|e| ConfigError::Template {
            template: query_template.to_string(),
            source: e,
        })?;
        Ok(Self {
            converter,
            template,
        })
    }

    fn label_for(&self, resource: &GroupResource) -> Result<String, QueryError> {
        self.converter
            .label_for_resource(resource)
            .map_err(|e| QueryError::Resolution {
                resource: resource.clone(),
                source: e,
            })
    }
}

impl MetricsQuery for TemplatedMetricsQuery {
    fn build(
        &self,
        series: &str,
        resource: &GroupResource,
        namespace: &str,
        extra_group_by: &[String],
        names: &[String],
    ) -> Result<Selector, QueryError> {
        if names.is_empty() {
            return Err(QueryError::NoResourceNames);
        }

        let mut exprs = Vec::with_capacity(2);
        let mut values_by_name = BTreeMap::new();

        if !namespace.is_empty() {
            let namespace_label = self.label_for(&GroupResource::namespaces())?;
            exprs.push(label_eq(&namespace_label, namespace));
            values_by_name.insert(namespace_label, vec![namespace.to_string()]);
        }

        let resource_label = self.label_for(resource)?;
        let expr = match names {
            [name] => label_eq(&resource_label, name),
            _ => label_matches(&resource_label, &names.join("|")),
        };
        exprs.push(expr);
        values_by_name.insert(resource_label.clone(), names.to_vec());

        let mut group_by = Vec::with_capacity(extra_group_by.len() + 1);
        group_by.push(resource_label);
        group_by.extend(extra_group_by.iter().cloned());

        let args = QueryTemplateArgs {
            series: series.to_string(),
            label_matchers: exprs.join(","),
            label_values_by_name: values_by_name,
            group_by,
        };

        let query = self.template.render(&args).map_err(QueryError::Template)?;
        if query.is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        Ok(Selector(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceMapping;
    use crate::naming::{KindRegistry, LabelResourceConverter};

    const RATE_QUERY: &str = "sum(rate(<<.Series>>{<<.LabelMatchers>>}[5m])) by (<<.GroupBy>>)";

    fn converter() -> Arc<dyn ResourceConverter> {
        let mapping = ResourceMapping {
            template: None,
            overrides: [
                ("namespace".to_string(), GroupResource::core("namespaces")),
                ("pod".to_string(), GroupResource::core("pods")),
            ]
            .into_iter()
            .collect(),
        };
        Arc::new(LabelResourceConverter::new(&mapping, Arc::new(KindRegistry::builtin())).unwrap())
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_single_name() {
        let query = TemplatedMetricsQuery::new(RATE_QUERY, converter()).unwrap();
        let selector = query
            .build(
                "http_requests_total",
                &GroupResource::core("pods"),
                "default",
                &[],
                &names(&["web-0"]),
            )
            .unwrap();

        assert_eq!(
            selector.as_str(),
            r#"sum(rate(http_requests_total{namespace="default",pod="web-0"}[5m])) by (pod)"#
        );
    }

    #[test]
    fn test_multiple_names_and_extra_group_by() {
        let query = TemplatedMetricsQuery::new(RATE_QUERY, converter()).unwrap();
        let selector = query
            .build(
                "container_cpu_usage_seconds_total",
                &GroupResource::core("pods"),
                "",
                &["container".to_string()],
                &names(&["web-0", "web-1"]),
            )
            .unwrap();

        assert_eq!(
            selector.as_str(),
            r#"sum(rate(container_cpu_usage_seconds_total{pod=~"web-0|web-1"}[5m])) by (pod,container)"#
        );
    }

    #[test]
    fn test_label_values_by_name() {
        let query = TemplatedMetricsQuery::new(
            r#"<<.Series>>{pod=~"<<index .LabelValuesByName "pod" | join "|">>"} by (<<join ";" .GroupBySlice>>)"#,
            converter(),
        )
        .unwrap();
        let selector = query
            .build(
                "up",
                &GroupResource::core("pods"),
                "default",
                &["node".to_string()],
                &names(&["a", "b"]),
            )
            .unwrap();

        assert_eq!(selector.as_str(), r#"up{pod=~"a|b"} by (pod;node)"#);
    }

    #[test]
    fn test_errors() {
        let query = TemplatedMetricsQuery::new(RATE_QUERY, converter()).unwrap();
        assert!(matches!(
            query.build("up", &GroupResource::core("pods"), "", &[], &[]),
            Err(QueryError::NoResourceNames)
        ));
        assert!(matches!(
            query.build("up", &GroupResource::core("services"), "", &[], &names(&["a"])),
            Err(QueryError::Resolution { .. })
        ));

        let empty = TemplatedMetricsQuery::new("<<.Series>>", converter()).unwrap();
        assert!(matches!(
            empty.build("", &GroupResource::core("pods"), "", &[], &names(&["a"])),
            Err(QueryError::EmptyQuery)
        ));

        assert!(TemplatedMetricsQuery::new("<<.Series", converter()).is_err());
    }
}
