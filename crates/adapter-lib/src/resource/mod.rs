//! Resource metrics: CPU and memory usage of pods and nodes
//!
//! Pods are queried per namespace. A namespace whose queries fail is skipped
//! and its pods are reported as missing, while the other namespaces are still
//! served. Node queries are cluster wide, so a failure fails the whole call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::client::{PrometheusClient, Sample};
use crate::config::{ResourceRule, ResourceRules};
use crate::error::{ConfigError, QueryError};
use crate::health::{components, HealthRegistry};
use crate::models::{
    byte_quantity, milli_quantity, ContainerMetrics, GroupResource, NamespacedName, NodeMetrics, PodMetrics,
    ResourceList, TimeInfo, RESOURCE_CPU, RESOURCE_MEMORY,
};
use crate::naming::{
    LabelResourceConverter, MetricsQuery, ResourceConverter, ResourceMapper,
    TemplatedMetricsQuery,
};
use crate::observability::AdapterMetrics;

/// The operations behind the resource metrics API.
///
/// Results are aligned with the requested targets; `None` marks a target
/// without complete CPU and memory data.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn get_container_metrics(
        &self,
        pods: &[NamespacedName],
    ) -> Result<Vec<Option<PodMetrics>>, QueryError>;

    async fn get_node_metrics(
        &self,
        nodes: &[String],
    ) -> Result<Vec<Option<NodeMetrics>>, QueryError>;
}

/// Samples keyed by the name of the object they describe
type QueryResults = HashMap<String, Vec<Sample>>;

/// Compiled queries for one of CPU or memory
struct ResourceQuery {
    converter: Arc<dyn ResourceConverter>,
    container_query: TemplatedMetricsQuery,
    node_query: TemplatedMetricsQuery,
    container_label: String,
}

impl ResourceQuery {
    fn new(rule: &ResourceRule, mapper: Arc<dyn ResourceMapper>) -> Result<Self, ConfigError> {
        let converter: Arc<dyn ResourceConverter> =
            Arc::new(LabelResourceConverter::new(&rule.resources, mapper)?);
        let container_query = TemplatedMetricsQuery::new(&rule.container_query, converter.clone())?;
        let node_query = TemplatedMetricsQuery::new(&rule.node_query, converter.clone())?;

        Ok(Self {
            converter,
            container_query,
            node_query,
            container_label: rule.container_label.clone(),
        })
    }
}

/// Runs the CPU and memory queries for a batch of objects
#[derive(Clone)]
struct Querier {
    client: Arc<dyn PrometheusClient>,
    cpu: Arc<ResourceQuery>,
    memory: Arc<ResourceQuery>,
}

impl Querier {
    async fn run_query(
        &self,
        now: DateTime<Utc>,
        which: &ResourceQuery,
        resource: &GroupResource,
        namespace: &str,
        names: &[String],
    ) -> Result<QueryResults, QueryError> {
        let query = if *resource == nodes() {
            which.node_query.build("", resource, namespace, &[], names)?
        } else {
            let extra_group_by = [which.container_label.clone()];
            which
                .container_query
                .build("", resource, namespace, &extra_group_by, names)?
        };

        let samples = self
            .client
            .query(Some(now), &query)
            .await?
            .into_vector()
            .map_err(QueryError::NonVector)?;

        let label = which
            .converter
            .label_for_resource(resource)
            .map_err(|e| QueryError::Resolution {
                resource: resource.clone(),
                source: e,
            })?;

        let mut results = QueryResults::with_capacity(samples.len());
        for sample in samples {
            let name = sample.metric.get(&label).cloned().unwrap_or_default();
            results.entry(name).or_default().push(sample);
        }
        Ok(results)
    }

    /// CPU and memory results, fetched concurrently
    async fn query_both(
        &self,
        now: DateTime<Utc>,
        resource: &GroupResource,
        namespace: &str,
        names: &[String],
    ) -> Result<(QueryResults, QueryResults), QueryError> {
        let (cpu, memory) = tokio::join!(
            self.run_query(now, &self.cpu, resource, namespace, names),
            self.run_query(now, &self.memory, resource, namespace, names),
        );

        let cpu = cpu.map_err(|e| {
            debug!(resource = %resource, namespace = %namespace, error = %e, "CPU query failed");
            e
        })?;
        let memory = memory.map_err(|e| {
            debug!(resource = %resource, namespace = %namespace, error = %e, "Memory query failed");
            e
        })?;
        Ok((cpu, memory))
    }
}

fn nodes() -> GroupResource {
    GroupResource::core("nodes")
}

fn pods() -> GroupResource {
    GroupResource::core("pods")
}

/// [`MetricsProvider`] answering from Prometheus queries
pub struct ResourceMetricsProvider {
    querier: Querier,
    window: Duration,
    metrics: AdapterMetrics,
    health: Option<HealthRegistry>,
}

impl ResourceMetricsProvider {
    pub fn new(
        client: Arc<dyn PrometheusClient>,
        mapper: Arc<dyn ResourceMapper>,
        rules: &ResourceRules,
    ) -> Result<Self, ConfigError> {
        let cpu = ResourceQuery::new(&rules.cpu, mapper.clone()).map_err(|e| {
            ConfigError::ResourceRule {
                which: RESOURCE_CPU,
                source: Box::new(e),
            }
        })?;
        let memory = ResourceQuery::new(&rules.memory, mapper).map_err(|e| {
            ConfigError::ResourceRule {
                which: RESOURCE_MEMORY,
                source: Box::new(e),
            }
        })?;

        Ok(Self {
            querier: Querier {
                client,
                cpu: Arc::new(cpu),
                memory: Arc::new(memory),
            },
            window: rules.window,
            metrics: AdapterMetrics::new(),
            health: None,
        })
    }

    /// Report namespace failures to the health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Merge the CPU and memory samples of one pod, one entry per container
    fn assemble_pod(
        &self,
        pod: &NamespacedName,
        cpu: &QueryResults,
        memory: &QueryResults,
    ) -> Option<PodMetrics> {
        let Some(cpu_samples) = cpu.get(&pod.name) else {
            warn!(pod = %pod, "Unable to fetch CPU metrics for pod, skipping");
            return None;
        };
        let Some(memory_samples) = memory.get(&pod.name) else {
            warn!(pod = %pod, "Unable to fetch memory metrics for pod, skipping");
            return None;
        };

        let mut containers: BTreeMap<String, ResourceList> = BTreeMap::new();
        let mut earliest: Option<DateTime<Utc>> = None;
        let resources: [(&str, &String, &Vec<Sample>, fn(f64) -> Quantity); 2] = [
            (RESOURCE_CPU, &self.querier.cpu.container_label, cpu_samples, milli_quantity),
            (RESOURCE_MEMORY, &self.querier.memory.container_label, memory_samples, byte_quantity),
        ];
        for (resource, label, samples, quantity) in resources {
            for sample in samples {
                let container = sample.metric.get(label).cloned().unwrap_or_default();
                containers
                    .entry(container)
                    .or_default()
                    .insert(resource.to_string(), quantity(sample.value));
                earliest = Some(earliest.map_or(sample.timestamp, |t| t.min(sample.timestamp)));
            }
        }

        Some(PodMetrics {
            time: TimeInfo {
                timestamp: earliest?,
                window: self.window,
            },
            containers: containers
                .into_iter()
                .map(|(name, usage)| ContainerMetrics { name, usage })
                .collect(),
        })
    }

    fn assemble_node(
        &self,
        node: &str,
        cpu: &QueryResults,
        memory: &QueryResults,
    ) -> Option<NodeMetrics> {
        let Some(cpu) = cpu.get(node).and_then(|s| s.first()) else {
            debug!(node = %node, "Missing CPU for node, skipping");
            return None;
        };
        let Some(memory) = memory.get(node).and_then(|s| s.first()) else {
            debug!(node = %node, "Missing memory for node, skipping");
            return None;
        };

        let usage = ResourceList::from([
            (RESOURCE_CPU.to_string(), milli_quantity(cpu.value)),
            (RESOURCE_MEMORY.to_string(), byte_quantity(memory.value)),
        ]);
        Some(NodeMetrics {
            time: TimeInfo {
                timestamp: cpu.timestamp.min(memory.timestamp),
                window: self.window,
            },
            usage,
        })
    }
}

#[async_trait]
impl MetricsProvider for ResourceMetricsProvider {
    async fn get_container_metrics(
        &self,
        pods_requested: &[NamespacedName],
    ) -> Result<Vec<Option<PodMetrics>>, QueryError> {
        if pods_requested.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_namespace: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for pod in pods_requested {
            by_namespace
                .entry(pod.namespace.clone())
                .or_default()
                .push(pod.name.clone());
        }

        let now = Utc::now();
        let mut tasks = JoinSet::new();
        for (namespace, names) in by_namespace {
            let querier = self.querier.clone();
            tasks.spawn(async move {
                let result = querier.query_both(now, &pods(), &namespace, &names).await;
                (namespace, result)
            });
        }

        let mut results = HashMap::new();
        let mut failed = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((namespace, Ok(both))) => {
                    results.insert(namespace, both);
                }
                Ok((namespace, Err(e))) => {
                    error!(namespace = %namespace, error = %e, "Unable to fetch metrics for pods in namespace, skipping");
                    self.metrics.inc_namespace_failures(&namespace);
                    failed.push(namespace);
                }
                Err(e) => {
                    error!(error = %e, "Pod metrics task failed");
                }
            }
        }

        if let Some(health) = &self.health {
            if failed.is_empty() {
                health.set_healthy(components::RESOURCE_METRICS).await;
            } else {
                let message = format!("unable to fetch pod metrics in namespaces {}", failed.join(","));
                health
                    .set_degraded(components::RESOURCE_METRICS, message)
                    .await;
            }
        }

        Ok(pods_requested
            .iter()
            .map(|pod| match results.get(&pod.namespace) {
                Some((cpu, memory)) => self.assemble_pod(pod, cpu, memory),
                None => {
                    debug!(pod = %pod, "No metrics for the pod's namespace, skipping");
                    None
                }
            })
            .collect())
    }

    async fn get_node_metrics(
        &self,
        nodes_requested: &[String],
    ) -> Result<Vec<Option<NodeMetrics>>, QueryError> {
        if nodes_requested.is_empty() {
            return Ok(Vec::new());
        }

        let (cpu, memory) = self
            .querier
            .query_both(Utc::now(), &nodes(), "", nodes_requested)
            .await
            .map_err(|e| {
                error!(error = %e, "Unable to fetch node metrics");
                e
            })?;

        Ok(nodes_requested
            .iter()
            .map(|node| self.assemble_node(node, &cpu, &memory))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakePrometheusClient;
    use crate::client::{LabelSet, QueryResult};
    use crate::config::ResourceMapping;
    use crate::naming::KindRegistry;
    use chrono::TimeZone;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    fn rule(series: &str) -> ResourceRule {
        ResourceRule {
            container_query: format!("sum({}{{<<.LabelMatchers>>}}) by (<<.GroupBy>>)", series),
            node_query: format!("sum(node_{}{{<<.LabelMatchers>>}}) by (<<.GroupBy>>)", series),
            resources: ResourceMapping::with_overrides([
                ("namespace", "namespace"),
                ("pod", "pod"),
                ("instance", "node"),
            ]),
            container_label: "container".into(),
        }
    }

    fn rules() -> ResourceRules {
        ResourceRules {
            cpu: rule("cpu"),
            memory: rule("mem"),
            window: Duration::from_secs(60),
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn sample(labels: &[(&str, &str)], value: f64, timestamp: DateTime<Utc>) -> Sample {
        Sample {
            metric: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<LabelSet>(),
            value,
            timestamp,
        }
    }

    fn provider(client: FakePrometheusClient) -> ResourceMetricsProvider {
        ResourceMetricsProvider::new(Arc::new(client), Arc::new(KindRegistry::builtin()), &rules())
            .unwrap()
    }

    #[tokio::test]
    async fn test_container_metrics_merge_by_container() {
        let client = FakePrometheusClient::new()
            .with_query_result(
                r#"sum(cpu{namespace="a",pod="web-0"}) by (pod,container)"#,
                QueryResult::Vector(vec![
                    sample(&[("pod", "web-0"), ("container", "app")], 0.5, at(10)),
                    sample(&[("pod", "web-0"), ("container", "proxy")], 0.125, at(5)),
                ]),
            )
            .with_query_result(
                r#"sum(mem{namespace="a",pod="web-0"}) by (pod,container)"#,
                QueryResult::Vector(vec![sample(
                    &[("pod", "web-0"), ("container", "app")],
                    1048576.5,
                    at(8),
                )]),
            );

        let result = provider(client)
            .get_container_metrics(&[NamespacedName::new("a", "web-0")])
            .await
            .unwrap();

        let pod = result[0].as_ref().unwrap();
        assert_eq!(pod.time.timestamp, at(5));
        assert_eq!(pod.time.window, Duration::from_secs(60));

        assert_eq!(pod.containers.len(), 2);
        assert_eq!(pod.containers[0].name, "app");
        assert_eq!(pod.containers[0].usage[RESOURCE_CPU], Quantity("500m".into()));
        assert_eq!(pod.containers[0].usage[RESOURCE_MEMORY], Quantity("1048576".into()));
        assert_eq!(pod.containers[1].name, "proxy");
        assert_eq!(pod.containers[1].usage[RESOURCE_CPU], Quantity("125m".into()));
        assert!(!pod.containers[1].usage.contains_key(RESOURCE_MEMORY));
    }

    #[tokio::test]
    async fn test_failing_namespace_is_skipped() {
        let client = FakePrometheusClient::new()
            .with_query_result(
                r#"sum(cpu{namespace="a",pod=~"web-0|web-1"}) by (pod,container)"#,
                QueryResult::Vector(vec![sample(&[("pod", "web-0"), ("container", "app")], 1.0, at(0))]),
            )
            .with_query_result(
                r#"sum(mem{namespace="a",pod=~"web-0|web-1"}) by (pod,container)"#,
                QueryResult::Vector(vec![sample(&[("pod", "web-0"), ("container", "app")], 2.0, at(0))]),
            )
            .with_error(
                r#"sum(mem{namespace="b",pod="db-0"}) by (pod,container)"#,
                "query timed out",
            );
        let health = HealthRegistry::new();
        let provider = provider(client).with_health(health.clone());

        let result = provider
            .get_container_metrics(&[
                NamespacedName::new("a", "web-0"),
                NamespacedName::new("b", "db-0"),
                NamespacedName::new("a", "web-1"),
            ])
            .await
            .unwrap();

        assert_eq!(result.len(), 3);
        assert_eq!(result[0].as_ref().unwrap().containers[0].name, "app");
        // failed namespace
        assert!(result[1].is_none());
        // no samples
        assert!(result[2].is_none());

        let health = health.health().await;
        assert!(health.components.contains_key(components::RESOURCE_METRICS));
    }

    #[tokio::test]
    async fn test_empty_request() {
        let provider = provider(FakePrometheusClient::new());
        assert!(provider.get_container_metrics(&[]).await.unwrap().is_empty());
        assert!(provider.get_node_metrics(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_node_missing_memory_is_skipped() {
        let client = FakePrometheusClient::new()
            .with_query_result(
                r#"sum(node_cpu{instance=~"node-a|node-b"}) by (instance)"#,
                QueryResult::Vector(vec![
                    sample(&[("instance", "node-a")], 1.5, at(3)),
                    sample(&[("instance", "node-b")], 0.25, at(4)),
                ]),
            )
            .with_query_result(
                r#"sum(node_mem{instance=~"node-a|node-b"}) by (instance)"#,
                QueryResult::Vector(vec![sample(&[("instance", "node-b")], 4096.0, at(2))]),
            );

        let result = provider(client)
            .get_node_metrics(&["node-a".to_string(), "node-b".to_string()])
            .await
            .unwrap();

        assert!(result[0].is_none());
        let node_b = result[1].as_ref().unwrap();
        assert_eq!(node_b.usage[RESOURCE_CPU], Quantity("250m".into()));
        assert_eq!(node_b.usage[RESOURCE_MEMORY], Quantity("4096".into()));
        assert_eq!(node_b.time.timestamp, at(2));
        assert_eq!(node_b.time.window, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_node_query_failure_fails_call() {
        let client = FakePrometheusClient::new()
            .with_error(r#"sum(node_cpu{instance="node-a"}) by (instance)"#, "bad data");
        let err = provider(client)
            .get_node_metrics(&["node-a".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Client(_)));
    }

    #[tokio::test]
    async fn test_non_vector_result() {
        let client = FakePrometheusClient::new().with_query_result(
            r#"sum(node_cpu{instance="node-a"}) by (instance)"#,
            QueryResult::Matrix(vec![]),
        );
        let err = provider(client)
            .get_node_metrics(&["node-a".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::NonVector(_)));
    }

    #[test]
    fn test_invalid_rule_names_resource() {
        let mut rules = rules();
        rules.memory.node_query = "<<.Series".into();
        let err = ResourceMetricsProvider::new(
            Arc::new(FakePrometheusClient::new()),
            Arc::new(KindRegistry::builtin()),
            &rules,
        )
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::ResourceRule { which: "memory", .. }));
    }
}
