//! Core data models shared by the custom and resource metrics providers

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::error::ResolutionError;
use crate::naming::ResourceMapper;

/// Plural resource name of the namespace kind
pub const NAMESPACES: &str = "namespaces";

/// A (group, resource) pair identifying a kind of Kubernetes object
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupResource {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    pub resource: String,
}

impl GroupResource {
    pub fn new(group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            resource: resource.into(),
        }
    }

    /// A resource in the core ("") group
    pub fn core(resource: impl Into<String>) -> Self {
        Self::new("", resource)
    }

    /// The canonical namespace resource
    pub fn namespaces() -> Self {
        Self::core(NAMESPACES)
    }

    pub fn is_namespace(&self) -> bool {
        self.group.is_empty() && self.resource == NAMESPACES
    }

    /// Parse the `resource.group` form used in API paths
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('.') {
            Some((resource, group)) => Self::new(group, resource),
            None => Self::core(raw),
        }
    }
}

impl fmt::Display for GroupResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.resource)
        } else {
            write!(f, "{}.{}", self.resource, self.group)
        }
    }
}

/// Identity of a metric exposed through the custom metrics API
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricInfo {
    pub group_resource: GroupResource,
    pub namespaced: bool,
    pub metric: String,
}

impl MetricInfo {
    pub fn new(group_resource: GroupResource, namespaced: bool, metric: impl Into<String>) -> Self {
        Self {
            group_resource,
            namespaced,
            metric: metric.into(),
        }
    }

    /// Canonicalize the resource so that equivalent spellings share one key
    pub fn normalized(&self, mapper: &dyn ResourceMapper) -> Result<Self, ResolutionError> {
        Ok(Self {
            group_resource: mapper.normalize(&self.group_resource)?,
            namespaced: self.namespaced,
            metric: self.metric.clone(),
        })
    }
}

impl fmt::Display for MetricInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespaced {
            write!(f, "{}/{}(namespaced)", self.group_resource, self.metric)
        } else {
            write!(f, "{}/{}", self.group_resource, self.metric)
        }
    }
}

/// A namespace-qualified object name; `namespace` is empty for cluster-scoped objects
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Reference to the object a metric value describes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub name: String,
    pub api_version: String,
}

/// A single custom metric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricValue {
    pub described_object: ObjectReference,
    pub metric_name: String,
    pub timestamp: DateTime<Utc>,
    pub value: Quantity,
}

/// Resource name to quantity, keyed by `cpu` / `memory`
pub type ResourceList = BTreeMap<String, Quantity>;

pub const RESOURCE_CPU: &str = "cpu";
pub const RESOURCE_MEMORY: &str = "memory";

/// Collection time of a resource usage reading and the window it covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInfo {
    pub timestamp: DateTime<Utc>,
    pub window: Duration,
}

/// Usage of a single container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerMetrics {
    pub name: String,
    pub usage: ResourceList,
}

/// Usage of all containers of one pod
#[derive(Debug, Clone, PartialEq)]
pub struct PodMetrics {
    pub time: TimeInfo,
    pub containers: Vec<ContainerMetrics>,
}

/// Usage of one node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMetrics {
    pub time: TimeInfo,
    pub usage: ResourceList,
}

/// Convert a raw sample value into a Kubernetes quantity with milli precision
pub fn milli_quantity(value: f64) -> Quantity {
    let milli = (value * 1000.0) as i64;
    if milli % 1000 == 0 {
        Quantity((milli / 1000).to_string())
    } else {
        Quantity(format!("{}m", milli))
    }
}

/// Convert a raw byte count into a Kubernetes quantity of whole bytes
pub fn byte_quantity(value: f64) -> Quantity {
    Quantity((value as i64).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_resource_display() {
        assert_eq!(GroupResource::core("pods").to_string(), "pods");
        assert_eq!(
            GroupResource::new("apps", "deployments").to_string(),
            "deployments.apps"
        );
    }

    #[test]
    fn test_group_resource_parse() {
        assert_eq!(GroupResource::parse("pods"), GroupResource::core("pods"));
        assert_eq!(
            GroupResource::parse("ingresses.networking.k8s.io"),
            GroupResource::new("networking.k8s.io", "ingresses")
        );
    }

    #[test]
    fn test_namespace_identity() {
        assert!(GroupResource::namespaces().is_namespace());
        assert!(!GroupResource::new("example.com", NAMESPACES).is_namespace());
    }

    #[test]
    fn test_milli_quantity() {
        assert_eq!(milli_quantity(2.0).0, "2");
        assert_eq!(milli_quantity(0.25).0, "250m");
        assert_eq!(milli_quantity(1048576.0).0, "1048576");
        assert_eq!(milli_quantity(0.0).0, "0");
    }

    #[test]
    fn test_byte_quantity_drops_fraction() {
        assert_eq!(byte_quantity(1048576.0).0, "1048576");
        assert_eq!(byte_quantity(2048.7).0, "2048");
        assert_eq!(byte_quantity(0.0).0, "0");
    }

    #[test]
    fn test_metric_info_display() {
        let info = MetricInfo::new(GroupResource::core("pods"), true, "cpu_usage");
        assert_eq!(info.to_string(), "pods/cpu_usage(namespaced)");
    }
}
