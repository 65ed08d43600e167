//! HTTP API: custom metrics, resource metrics, health checks and Prometheus metrics

use adapter_lib::{
    custom::CustomMetricsProvider,
    health::{ComponentStatus, HealthRegistry},
    GroupResource, MetricInfo, MetricValue, MetricsProvider, NamespacedName, NodeMetrics,
    PodMetrics, ProviderError, QueryError,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIResource, ListMeta, ObjectMeta, Time};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

pub const CUSTOM_METRICS_GROUP_VERSION: &str = "custom.metrics.k8s.io/v1beta1";
pub const RESOURCE_METRICS_GROUP_VERSION: &str = "metrics.k8s.io/v1beta1";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub custom: Arc<dyn CustomMetricsProvider>,
    /// Absent when no resource rules are configured
    pub resources: Option<Arc<dyn MetricsProvider>>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        custom: Arc<dyn CustomMetricsProvider>,
        resources: Option<Arc<dyn MetricsProvider>>,
    ) -> Self {
        Self {
            health_registry,
            custom,
            resources,
        }
    }
}

/// Error response rendered as a Kubernetes `Status`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub kind: String,
    pub api_version: String,
    pub metadata: BTreeMap<String, String>,
    pub status: String,
    pub message: String,
    pub reason: String,
    pub code: u16,
}

impl ApiError {
    fn new(code: u16, reason: &str, message: impl Into<String>) -> Self {
        Self {
            kind: "Status".to_string(),
            api_version: "v1".to_string(),
            metadata: BTreeMap::new(),
            status: "Failure".to_string(),
            message: message.into(),
            reason: reason.to_string(),
            code,
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, "NotFound", message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(500, "InternalError", message)
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        Self::new(err.status_code(), err.reason(), err.to_string())
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        error!(error = %err, "Resource metrics query failed");
        Self::internal("unable to fetch metrics")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Discovery document listing the served resources
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ApiResourceList {
    pub kind: String,
    pub api_version: String,
    pub group_version: String,
    pub resources: Vec<APIResource>,
}

impl ApiResourceList {
    fn new(group_version: &str, resources: Vec<APIResource>) -> Self {
        Self {
            kind: "APIResourceList".to_string(),
            api_version: "v1".to_string(),
            group_version: group_version.to_string(),
            resources,
        }
    }
}

/// MetricValueList is the top-level list type for the custom metrics API
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MetricValueList {
    pub kind: String,
    pub api_version: String,
    pub metadata: ListMeta,
    pub items: Vec<MetricValue>,
}

impl MetricValueList {
    fn new(items: Vec<MetricValue>) -> Self {
        Self {
            kind: "MetricValueList".to_string(),
            api_version: CUSTOM_METRICS_GROUP_VERSION.to_string(),
            metadata: ListMeta::default(),
            items,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ContainerUsage {
    pub name: String,
    pub usage: adapter_lib::ResourceList,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PodMetricsResponse {
    pub kind: String,
    pub api_version: String,
    pub metadata: ObjectMeta,
    pub timestamp: Time,
    pub window: String,
    pub containers: Vec<ContainerUsage>,
}

impl PodMetricsResponse {
    fn new(pod: &NamespacedName, metrics: PodMetrics) -> Self {
        Self {
            kind: "PodMetrics".to_string(),
            api_version: RESOURCE_METRICS_GROUP_VERSION.to_string(),
            metadata: object_meta(Some(&pod.namespace), &pod.name),
            timestamp: Time(metrics.time.timestamp),
            window: window(metrics.time.window),
            containers: metrics
                .containers
                .into_iter()
                .map(|c| ContainerUsage {
                    name: c.name,
                    usage: c.usage,
                })
                .collect(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetricsResponse {
    pub kind: String,
    pub api_version: String,
    pub metadata: ObjectMeta,
    pub timestamp: Time,
    pub window: String,
    pub usage: adapter_lib::ResourceList,
}

impl NodeMetricsResponse {
    fn new(node: &str, metrics: NodeMetrics) -> Self {
        Self {
            kind: "NodeMetrics".to_string(),
            api_version: RESOURCE_METRICS_GROUP_VERSION.to_string(),
            metadata: object_meta(None, node),
            timestamp: Time(metrics.time.timestamp),
            window: window(metrics.time.window),
            usage: metrics.usage,
        }
    }
}

fn object_meta(namespace: Option<&str>, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        creation_timestamp: Some(Time(chrono::Utc::now())),
        ..Default::default()
    }
}

fn window(duration: std::time::Duration) -> String {
    format!("{}s", duration.as_secs())
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still serving the last metric set
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 once the first discovery cycle succeeded
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Every custom metric, one resource entry per (resource, metric) pair
async fn list_custom_metrics(State(state): State<Arc<AppState>>) -> Json<ApiResourceList> {
    let resources = state
        .custom
        .list_all_metrics()
        .into_iter()
        .map(|info| APIResource {
            name: format!("{}/{}", info.group_resource, info.metric),
            singular_name: String::new(),
            namespaced: info.namespaced,
            kind: "MetricValueList".to_string(),
            verbs: vec!["get".to_string()],
            ..Default::default()
        })
        .collect();

    Json(ApiResourceList::new(CUSTOM_METRICS_GROUP_VERSION, resources))
}

/// A custom metrics request decoded from its path
#[derive(Debug, Clone, PartialEq)]
pub enum CustomMetricPath {
    /// `namespaces/{ns}/{resource}/{name}/{metric}`
    Namespaced {
        namespace: String,
        resource: GroupResource,
        name: String,
        metric: String,
    },
    /// `namespaces/{name}/metrics/{metric}`
    Namespace { name: String, metric: String },
    /// `{resource}/{name}/{metric}`
    Cluster {
        resource: GroupResource,
        name: String,
        metric: String,
    },
}

impl CustomMetricPath {
    pub fn parse(path: &str) -> Option<Self> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let parsed = match segments.as_slice() {
            ["namespaces", name, "metrics", metric] => CustomMetricPath::Namespace {
                name: name.to_string(),
                metric: metric.to_string(),
            },
            ["namespaces", namespace, resource, name, metric] => CustomMetricPath::Namespaced {
                namespace: namespace.to_string(),
                resource: GroupResource::parse(resource),
                name: name.to_string(),
                metric: metric.to_string(),
            },
            [resource, name, metric] => CustomMetricPath::Cluster {
                resource: GroupResource::parse(resource),
                name: name.to_string(),
                metric: metric.to_string(),
            },
            _ => return None,
        };

        let empty = match &parsed {
            CustomMetricPath::Namespaced {
                namespace,
                name,
                metric,
                ..
            } => namespace.is_empty() || name.is_empty() || metric.is_empty(),
            CustomMetricPath::Namespace { name, metric } => name.is_empty() || metric.is_empty(),
            CustomMetricPath::Cluster { name, metric, .. } => name.is_empty() || metric.is_empty(),
        };
        (!empty).then_some(parsed)
    }

    /// The metric identity, the namespace to query in and the object name
    fn into_parts(self) -> (MetricInfo, String, String) {
        match self {
            CustomMetricPath::Namespaced {
                namespace,
                resource,
                name,
                metric,
            } => (MetricInfo::new(resource, true, metric), namespace, name),
            CustomMetricPath::Namespace { name, metric } => (
                MetricInfo::new(GroupResource::namespaces(), false, metric),
                String::new(),
                name,
            ),
            CustomMetricPath::Cluster {
                resource,
                name,
                metric,
            } => (MetricInfo::new(resource, false, metric), String::new(), name),
        }
    }
}

/// Value of a custom metric for one object, or for all objects matching
/// `labelSelector` when the name is `*`
async fn get_custom_metric(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<MetricValueList>, ApiError> {
    let request = CustomMetricPath::parse(&path).ok_or_else(|| {
        warn!(path = %path, "Unsupported custom metrics path");
        ApiError::not_found(format!("the server could not find the requested resource {}", path))
    })?;
    let (info, namespace, name) = request.into_parts();
    debug!(metric = %info, namespace = %namespace, name = %name, "Received custom metrics request");

    let items = if name == "*" {
        let selector = params.get("labelSelector").map(String::as_str).unwrap_or("");
        state
            .custom
            .get_metric_by_selector(&namespace, selector, &info)
            .await?
    } else {
        let value = state
            .custom
            .get_metric_by_name(&NamespacedName::new(namespace, name), &info)
            .await?;
        vec![value]
    };

    Ok(Json(MetricValueList::new(items)))
}

fn resource_provider(state: &AppState) -> Result<Arc<dyn MetricsProvider>, ApiError> {
    state
        .resources
        .clone()
        .ok_or_else(|| ApiError::not_found("resource metrics are not configured"))
}

async fn list_resource_metrics() -> Json<ApiResourceList> {
    let resource = |name: &str, kind: &str, namespaced: bool| APIResource {
        name: name.to_string(),
        singular_name: String::new(),
        namespaced,
        kind: kind.to_string(),
        verbs: vec!["get".to_string()],
        ..Default::default()
    };
    Json(ApiResourceList::new(
        RESOURCE_METRICS_GROUP_VERSION,
        vec![
            resource("nodes", "NodeMetrics", false),
            resource("pods", "PodMetrics", true),
        ],
    ))
}

async fn get_pod_metrics(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<PodMetricsResponse>, ApiError> {
    let provider = resource_provider(&state)?;
    let pod = NamespacedName::new(namespace, name);

    let metrics = provider
        .get_container_metrics(std::slice::from_ref(&pod))
        .await?
        .into_iter()
        .next()
        .flatten()
        .ok_or_else(|| ApiError::not_found(format!("pod metrics for {} not found", pod)))?;

    Ok(Json(PodMetricsResponse::new(&pod, metrics)))
}

async fn get_node_metrics(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<NodeMetricsResponse>, ApiError> {
    let provider = resource_provider(&state)?;

    let metrics = provider
        .get_node_metrics(std::slice::from_ref(&name))
        .await?
        .into_iter()
        .next()
        .flatten()
        .ok_or_else(|| ApiError::not_found(format!("node metrics for {} not found", name)))?;

    Ok(Json(NodeMetricsResponse::new(&name, metrics)))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/apis/custom.metrics.k8s.io/v1beta1", get(list_custom_metrics))
        .route("/apis/custom.metrics.k8s.io/v1beta1/*path", get(get_custom_metric))
        .route("/apis/metrics.k8s.io/v1beta1", get(list_resource_metrics))
        .route(
            "/apis/metrics.k8s.io/v1beta1/namespaces/:namespace/pods/:name",
            get(get_pod_metrics),
        )
        .route("/apis/metrics.k8s.io/v1beta1/nodes/:name", get(get_node_metrics))
        .with_state(state)
}

/// Start the API server; returns once `shutdown` fires
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_namespaced_path() {
        assert_eq!(
            CustomMetricPath::parse("namespaces/default/deployments.apps/web/http_requests"),
            Some(CustomMetricPath::Namespaced {
                namespace: "default".into(),
                resource: GroupResource::new("apps", "deployments"),
                name: "web".into(),
                metric: "http_requests".into(),
            })
        );
    }

    #[test]
    fn test_parse_namespace_and_cluster_paths() {
        assert_eq!(
            CustomMetricPath::parse("/namespaces/default/metrics/queue_length"),
            Some(CustomMetricPath::Namespace {
                name: "default".into(),
                metric: "queue_length".into(),
            })
        );
        assert_eq!(
            CustomMetricPath::parse("nodes/node-a/load"),
            Some(CustomMetricPath::Cluster {
                resource: GroupResource::core("nodes"),
                name: "node-a".into(),
                metric: "load".into(),
            })
        );
    }

    #[test]
    fn test_parse_rejects_other_paths() {
        assert_eq!(CustomMetricPath::parse("pods"), None);
        assert_eq!(CustomMetricPath::parse("namespaces/default/pods//cpu"), None);
        assert_eq!(CustomMetricPath::parse("a/b/c/d"), None);
    }

    #[test]
    fn test_provider_error_status() {
        let err = ApiError::from(ProviderError::not_found(
            &GroupResource::core("pods"),
            "cpu_usage",
        ));
        assert_eq!(err.code, 404);
        assert_eq!(err.reason, "NotFound");
        assert_eq!(err.kind, "Status");

        let err = ApiError::from(ProviderError::Internal("unable to fetch metrics".into()));
        assert_eq!(err.code, 500);
        assert_eq!(err.message, "Internal error occurred: unable to fetch metrics");
    }

    #[test]
    fn test_window_format() {
        assert_eq!(window(std::time::Duration::from_secs(300)), "300s");
    }
}
