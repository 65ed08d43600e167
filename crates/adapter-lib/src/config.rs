//! Metrics discovery configuration
//!
//! Loaded from YAML. Every rule names the series it applies to, how their
//! labels map to Kubernetes resources, how the series name becomes a metric
//! name, and the query used to fetch values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::client::{label_neq, match_series, name_matches, name_not_matches};
use crate::error::ConfigError;
use crate::models::GroupResource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MetricsDiscoveryConfig {
    /// Rules for custom metrics, evaluated in order
    #[serde(default)]
    pub rules: Vec<DiscoveryRule>,

    /// Rules for the resource metrics API (CPU and memory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_rules: Option<ResourceRules>,
}

/// Describes how to discover a set of series and expose them as metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DiscoveryRule {
    /// Series selector passed to the backend's series API
    pub series_query: String,

    /// Additional filters applied to the discovered series names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub series_filters: Vec<RegexFilter>,

    #[serde(default)]
    pub resources: ResourceMapping,

    #[serde(default)]
    pub name: NameMapping,

    /// Query template used to fetch metric values
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub metrics_query: String,
}

/// A series name filter; exactly one of `is` and `isNot` must be set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegexFilter {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub is: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub is_not: String,
}

impl RegexFilter {
    pub fn is(pattern: impl Into<String>) -> Self {
        Self {
            is: pattern.into(),
            is_not: String::new(),
        }
    }

    pub fn is_not(pattern: impl Into<String>) -> Self {
        Self {
            is: String::new(),
            is_not: pattern.into(),
        }
    }
}

/// Label to resource association
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceMapping {
    /// Label name template with `<<.Group>>` and `<<.Resource>>` placeholders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    /// Explicit label to resource mappings
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, GroupResource>,
}

impl ResourceMapping {
    pub fn with_template(template: impl Into<String>) -> Self {
        Self {
            template: Some(template.into()),
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_overrides<'a>(overrides: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            template: None,
            overrides: overrides
                .into_iter()
                .map(|(label, resource)| (label.to_string(), GroupResource::core(resource)))
                .collect(),
        }
    }
}

/// Series name to metric name conversion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NameMapping {
    /// Regex matched against the series name; empty means `.*`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub matches: String,

    /// Replacement pattern for the metric name (`$0`, `$1`, `${name}`)
    #[serde(default, rename = "as", skip_serializing_if = "String::is_empty")]
    pub as_: String,
}

impl NameMapping {
    pub fn matches(pattern: impl Into<String>) -> Self {
        Self {
            matches: pattern.into(),
            as_: String::new(),
        }
    }
}

/// Queries for the resource metrics API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceRules {
    pub cpu: ResourceRule,
    pub memory: ResourceRule,

    /// Window the CPU rate is computed over
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceRule {
    pub container_query: String,
    pub node_query: String,
    #[serde(default)]
    pub resources: ResourceMapping,
    /// Label holding the container name
    pub container_label: String,
}

impl MetricsDiscoveryConfig {
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Render a duration the way PromQL range selectors expect (`5m`, `1m30s`)
pub fn prom_duration(duration: Duration) -> String {
    let mut ms = duration.as_millis();
    if ms == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    for (unit, size) in [
        ("w", 7 * 24 * 3_600_000),
        ("d", 24 * 3_600_000),
        ("h", 3_600_000),
        ("m", 60_000),
        ("s", 1_000),
        ("ms", 1),
    ] {
        if ms >= size {
            out.push_str(&format!("{}{}", ms / size, unit));
            ms %= size;
        }
    }
    out
}

/// The stock rule set for cAdvisor container metrics plus generic
/// application metrics labelled with `<label_prefix><resource>`
pub fn default_config(rate_interval: Duration, label_prefix: &str) -> MetricsDiscoveryConfig {
    let rate = prom_duration(rate_interval);

    let container_series = match_series(
        "",
        &[
            name_matches("^container_.*"),
            label_neq("container_name", "POD"),
            label_neq("namespace", ""),
            label_neq("pod_name", ""),
        ],
    );
    let app_series = match_series(
        "",
        &[
            label_neq(&format!("{}namespace", label_prefix), ""),
            name_not_matches("^container_.*"),
        ],
    );
    let container_resources =
        ResourceMapping::with_overrides([("namespace", "namespace"), ("pod_name", "pod")]);
    let app_resources = ResourceMapping::with_template(format!("{}<<.Resource>>", label_prefix));
    let container_rate_query = format!(
        r#"sum(rate(<<.Series>>{{<<.LabelMatchers>>,container_name!="POD"}}[{}])) by (<<.GroupBy>>)"#,
        rate
    );
    let app_rate_query = format!(
        "sum(rate(<<.Series>>{{<<.LabelMatchers>>}}[{}])) by (<<.GroupBy>>)",
        rate
    );

    let rules = vec![
        // cumulative cAdvisor CPU metrics
        DiscoveryRule {
            series_query: container_series.0.clone(),
            series_filters: vec![],
            resources: container_resources.clone(),
            name: NameMapping::matches("^container_(.*)_seconds_total$"),
            metrics_query: container_rate_query.clone(),
        },
        // other cumulative cAdvisor metrics
        DiscoveryRule {
            series_query: container_series.0.clone(),
            series_filters: vec![RegexFilter::is_not("^container_.*_seconds_total$")],
            resources: container_resources.clone(),
            name: NameMapping::matches("^container_(.*)_total$"),
            metrics_query: container_rate_query,
        },
        // cAdvisor gauges
        DiscoveryRule {
            series_query: container_series.0.clone(),
            series_filters: vec![RegexFilter::is_not("^container_.*_total$")],
            resources: container_resources,
            name: NameMapping::matches("^container_(.*)$"),
            metrics_query: r#"sum(<<.Series>>{<<.LabelMatchers>>,container_name!="POD"}) by (<<.GroupBy>>)"#
                .to_string(),
        },
        // application gauges
        DiscoveryRule {
            series_query: app_series.0.clone(),
            series_filters: vec![RegexFilter::is_not(".*_total$")],
            resources: app_resources.clone(),
            name: NameMapping::default(),
            metrics_query: "sum(<<.Series>>{<<.LabelMatchers>>}) by (<<.GroupBy>>)".to_string(),
        },
        // application counters
        DiscoveryRule {
            series_query: app_series.0.clone(),
            series_filters: vec![RegexFilter::is_not(".*_seconds_total")],
            resources: app_resources.clone(),
            name: NameMapping::matches("^(.*)_total$"),
            metrics_query: app_rate_query.clone(),
        },
        // application second counters
        DiscoveryRule {
            series_query: app_series.0,
            series_filters: vec![],
            resources: app_resources,
            name: NameMapping::matches("^(.*)_seconds_total$"),
            metrics_query: app_rate_query,
        },
    ];

    let node_resources = ResourceMapping::with_overrides([
        ("namespace", "namespace"),
        ("pod_name", "pod"),
        ("instance", "node"),
    ]);
    let container_label = format!("{}container_name", label_prefix);

    let resource_rules = ResourceRules {
        cpu: ResourceRule {
            container_query: format!(
                "sum(rate(container_cpu_usage_seconds_total{{<<.LabelMatchers>>}}[{}])) by (<<.GroupBy>>)",
                rate
            ),
            node_query: format!(
                "sum(rate(container_cpu_usage_seconds_total{{<<.LabelMatchers>>, id='/'}}[{}])) by (<<.GroupBy>>)",
                rate
            ),
            resources: node_resources.clone(),
            container_label: container_label.clone(),
        },
        memory: ResourceRule {
            container_query: "sum(container_memory_working_set_bytes{<<.LabelMatchers>>}) by (<<.GroupBy>>)"
                .to_string(),
            node_query: "sum(container_memory_working_set_bytes{<<.LabelMatchers>>,id='/'}) by (<<.GroupBy>>)"
                .to_string(),
            resources: node_resources,
            container_label,
        },
        window: rate_interval,
    };

    MetricsDiscoveryConfig {
        rules,
        resource_rules: Some(resource_rules),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
rules:
- seriesQuery: '{__name__=~"^container_.*",namespace!=""}'
  seriesFilters:
  - isNot: "^container_.*_seconds_total$"
  resources:
    overrides:
      namespace: {resource: namespace}
      pod_name: {resource: pod}
  name:
    matches: "^container_(.*)_total$"
  metricsQuery: 'sum(rate(<<.Series>>{<<.LabelMatchers>>}[1m])) by (<<.GroupBy>>)'
- seriesQuery: 'http_requests_total'
  resources:
    template: "kube_<<.Group>>_<<.Resource>>"
  name:
    matches: "^(.*)_total$"
    as: "${1}_per_second"
resourceRules:
  cpu:
    containerQuery: 'sum(rate(container_cpu_usage_seconds_total{<<.LabelMatchers>>}[1m])) by (<<.GroupBy>>)'
    nodeQuery: 'sum(rate(container_cpu_usage_seconds_total{<<.LabelMatchers>>, id="/"}[1m])) by (<<.GroupBy>>)'
    resources:
      overrides:
        instance: {resource: node}
    containerLabel: container_name
  memory:
    containerQuery: 'sum(container_memory_working_set_bytes{<<.LabelMatchers>>}) by (<<.GroupBy>>)'
    nodeQuery: 'sum(container_memory_working_set_bytes{<<.LabelMatchers>>,id="/"}) by (<<.GroupBy>>)'
    containerLabel: container_name
  window: 1m
"#;

    #[test]
    fn test_parse_sample() {
        let config = MetricsDiscoveryConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.rules.len(), 2);

        let first = &config.rules[0];
        assert_eq!(first.series_filters, vec![RegexFilter::is_not("^container_.*_seconds_total$")]);
        assert_eq!(
            first.resources.overrides["pod_name"],
            GroupResource::core("pod")
        );
        assert_eq!(first.name.as_, "");

        let second = &config.rules[1];
        assert_eq!(second.name.as_, "${1}_per_second");
        assert_eq!(
            second.resources.template.as_deref(),
            Some("kube_<<.Group>>_<<.Resource>>")
        );
        assert!(second.metrics_query.is_empty());

        let resource_rules = config.resource_rules.unwrap();
        assert_eq!(resource_rules.window, Duration::from_secs(60));
        assert_eq!(resource_rules.memory.container_label, "container_name");
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = MetricsDiscoveryConfig::from_yaml("rules:\n- seriesQuery: up\n  metricQuery: up\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = MetricsDiscoveryConfig::from_file(file.path()).unwrap();
        assert_eq!(config.rules.len(), 2);

        assert!(matches!(
            MetricsDiscoveryConfig::from_file("/nonexistent/config.yaml"),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_prom_duration() {
        assert_eq!(prom_duration(Duration::from_secs(300)), "5m");
        assert_eq!(prom_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(prom_duration(Duration::from_secs(2 * 3600)), "2h");
        assert_eq!(prom_duration(Duration::from_millis(1500)), "1s500ms");
        assert_eq!(prom_duration(Duration::ZERO), "0s");
    }

    #[test]
    fn test_default_config() {
        let config = default_config(Duration::from_secs(300), "kube_");
        assert_eq!(config.rules.len(), 6);

        assert_eq!(
            config.rules[0].series_query,
            r#"{__name__=~"^container_.*",container_name!="POD",namespace!="",pod_name!=""}"#
        );
        assert!(config.rules[0].metrics_query.contains("[5m]"));
        assert_eq!(
            config.rules[3].resources.template.as_deref(),
            Some("kube_<<.Resource>>")
        );
        assert_eq!(
            config.rules[3].series_query,
            r#"{kube_namespace!="",__name__!~"^container_.*"}"#
        );

        let resource_rules = config.resource_rules.as_ref().unwrap();
        assert_eq!(resource_rules.window, Duration::from_secs(300));
        assert_eq!(resource_rules.cpu.container_label, "kube_container_name");
        assert_eq!(
            resource_rules.cpu.resources.overrides["instance"],
            GroupResource::core("node")
        );

        // what gets printed can be loaded back
        let yaml = config.to_yaml().unwrap();
        assert_eq!(MetricsDiscoveryConfig::from_yaml(&yaml).unwrap(), config);
    }
}
