//! Per-rule metric naming

use regex::Regex;
use std::sync::Arc;

use super::filter::{FilterChain, SeriesFilter};
use crate::client::{Selector, Series};
use crate::config::{DiscoveryRule, MetricsDiscoveryConfig};
use crate::error::{ConfigError, NamingError, QueryError, ResolutionError};
use crate::models::GroupResource;
use crate::naming::{
    LabelResourceConverter, MetricsQuery, ResourceConverter, ResourceMapper, TemplatedMetricsQuery,
};

/// Everything needed to turn the series of one discovery rule into metrics
pub trait MetricNamer: ResourceConverter {
    /// Selector used to discover the series of this rule
    fn selector(&self) -> &Selector;

    /// The series this rule applies to
    fn filter_series(&self, series: &[Series]) -> Vec<Series>;

    /// Name under which a series is exposed
    fn metric_name_for_series(&self, series: &Series) -> Result<String, NamingError>;

    /// Query fetching `series` for the named objects
    fn query_for_series(
        &self,
        series: &str,
        resource: &GroupResource,
        namespace: &str,
        names: &[String],
    ) -> Result<Selector, QueryError>;
}

/// [`MetricNamer`] built from a [`DiscoveryRule`]
pub struct RuleNamer {
    selector: Selector,
    filters: FilterChain,
    name_matches: Regex,
    name_as: String,
    converter: Arc<LabelResourceConverter>,
    query: TemplatedMetricsQuery,
}

impl RuleNamer {
    pub fn new(rule: &DiscoveryRule, mapper: Arc<dyn ResourceMapper>) -> Result<Self, ConfigError> {
        Self::build(rule, mapper).map_err(|e| ConfigError::Rule {
            series_query: rule.series_query.clone(),
            source: Box::new(e),
        })
    }

    fn build(rule: &DiscoveryRule, mapper: Arc<dyn ResourceMapper>) -> Result<Self, ConfigError> {
        let converter = Arc::new(LabelResourceConverter::new(&rule.resources, mapper)?);
        let query = TemplatedMetricsQuery::new(&rule.metrics_query, converter.clone())?;

        let mut filters = FilterChain::new(
            rule.series_filters
                .iter()
                .map(SeriesFilter::new)
                .collect::<Result<_, _>>()?,
        );

        // Series the name pattern cannot handle are dropped up front
        let pattern = if rule.name.matches.is_empty() {
            ".*"
        } else {
            filters.push(SeriesFilter::is(&rule.name.matches)?);
            rule.name.matches.as_str()
        };
        let name_matches = Regex::new(pattern).map_err(|e| ConfigError::Regex {
            pattern: pattern.to_string(),
            source: e,
        })?;

        let name_as = if !rule.name.as_.is_empty() {
            rule.name.as_.clone()
        } else {
            match name_matches.captures_len() {
                1 => "$0".to_string(),
                2 => "$1".to_string(),
                _ => {
                    return Err(ConfigError::AmbiguousName {
                        matches: rule.name.matches.clone(),
                    })
                }
            }
        };

        Ok(Self {
            selector: Selector::new(rule.series_query.clone()),
            filters,
            name_matches,
            name_as,
            converter,
            query,
        })
    }
}

impl ResourceConverter for RuleNamer {
    fn resources_for_series(&self, series: &Series) -> (Vec<GroupResource>, bool) {
        self.converter.resources_for_series(series)
    }

    fn label_for_resource(&self, resource: &GroupResource) -> Result<String, ResolutionError> {
        self.converter.label_for_resource(resource)
    }
}

impl MetricNamer for RuleNamer {
    fn selector(&self) -> &Selector {
        &self.selector
    }

    fn filter_series(&self, series: &[Series]) -> Vec<Series> {
        self.filters.filter(series)
    }

    fn metric_name_for_series(&self, series: &Series) -> Result<String, NamingError> {
        let captures = self
            .name_matches
            .captures(&series.name)
            .ok_or_else(|| NamingError {
                series: series.name.clone(),
                pattern: self.name_matches.as_str().to_string(),
            })?;

        let mut name = String::new();
        captures.expand(&self.name_as, &mut name);
        Ok(name)
    }

    fn query_for_series(
        &self,
        series: &str,
        resource: &GroupResource,
        namespace: &str,
        names: &[String],
    ) -> Result<Selector, QueryError> {
        self.query.build(series, resource, namespace, &[], names)
    }
}

/// One namer per rule, in rule order
pub fn namers_from_config(
    config: &MetricsDiscoveryConfig,
    mapper: Arc<dyn ResourceMapper>,
) -> Result<Vec<Arc<dyn MetricNamer>>, ConfigError> {
    config
        .rules
        .iter()
        .map(|rule| Ok(Arc::new(RuleNamer::new(rule, mapper.clone())?) as Arc<dyn MetricNamer>))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::LabelSet;
    use crate::config::{NameMapping, RegexFilter, ResourceMapping};
    use crate::naming::KindRegistry;

    fn rule(matches: &str, as_: &str) -> DiscoveryRule {
        DiscoveryRule {
            series_query: r#"{__name__=~"^container_.*"}"#.into(),
            series_filters: vec![],
            resources: ResourceMapping::with_overrides([("namespace", "namespace"), ("pod", "pod")]),
            name: NameMapping {
                matches: matches.into(),
                as_: as_.into(),
            },
            metrics_query: "sum(<<.Series>>{<<.LabelMatchers>>}) by (<<.GroupBy>>)".into(),
        }
    }

    fn namer(rule: &DiscoveryRule) -> RuleNamer {
        RuleNamer::new(rule, Arc::new(KindRegistry::builtin())).unwrap()
    }

    fn series(name: &str) -> Series {
        Series::new(name, LabelSet::new())
    }

    #[test]
    fn test_default_as_with_one_group() {
        let namer = namer(&rule("^container_(.*)_seconds_total$", ""));
        assert_eq!(
            namer
                .metric_name_for_series(&series("container_cpu_usage_seconds_total"))
                .unwrap(),
            "cpu_usage"
        );
    }

    #[test]
    fn test_default_as_without_groups() {
        let namer = namer(&rule("", ""));
        assert_eq!(
            namer.metric_name_for_series(&series("node_load1")).unwrap(),
            "node_load1"
        );

        let namer = namer_with_pattern("^node_.*");
        assert_eq!(
            namer.metric_name_for_series(&series("node_load1")).unwrap(),
            "node_load1"
        );
    }

    fn namer_with_pattern(pattern: &str) -> RuleNamer {
        namer(&rule(pattern, ""))
    }

    #[test]
    fn test_explicit_as() {
        let namer = namer(&rule("^(?P<base>.*)_total$", "${base}_per_second"));
        assert_eq!(
            namer.metric_name_for_series(&series("http_requests_total")).unwrap(),
            "http_requests_per_second"
        );
    }

    #[test]
    fn test_ambiguous_name_rejected() {
        let result = RuleNamer::new(
            &rule("^(.*)_(.*)_total$", ""),
            Arc::new(KindRegistry::builtin()),
        );
        match result {
            Err(ConfigError::Rule { source, .. }) => {
                assert!(matches!(*source, ConfigError::AmbiguousName { .. }))
            }
            other => panic!("expected ambiguous name error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_non_matching_series_is_an_error() {
        let namer = namer(&rule("^container_(.*)_seconds_total$", ""));
        let err = namer.metric_name_for_series(&series("up")).unwrap_err();
        assert_eq!(err.series, "up");
    }

    #[test]
    fn test_name_pattern_filters_series() {
        let mut rule = rule("^container_(.*)_total$", "");
        rule.series_filters = vec![RegexFilter::is_not("_seconds_total$")];
        let namer = namer(&rule);

        let kept = namer.filter_series(&[
            series("container_cpu_usage_seconds_total"),
            series("container_network_receive_bytes_total"),
            series("container_memory_usage_bytes"),
        ]);
        assert_eq!(kept, vec![series("container_network_receive_bytes_total")]);
    }

    #[test]
    fn test_query_for_series() {
        let namer = namer(&rule("", ""));
        let query = namer
            .query_for_series(
                "container_memory_usage_bytes",
                &GroupResource::core("pods"),
                "default",
                &["web-0".to_string()],
            )
            .unwrap();
        assert_eq!(
            query.as_str(),
            r#"sum(container_memory_usage_bytes{namespace="default",pod="web-0"}) by (pod)"#
        );
    }

    #[test]
    fn test_namers_from_config() {
        let config = MetricsDiscoveryConfig {
            rules: vec![rule("^container_(.*)$", ""), rule("", "")],
            resource_rules: None,
        };
        let namers = namers_from_config(&config, Arc::new(KindRegistry::builtin())).unwrap();
        assert_eq!(namers.len(), 2);
        assert_eq!(namers[0].selector(), namers[1].selector());
    }
}
