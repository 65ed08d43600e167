//! Registry of the Kubernetes kinds the adapter can describe
//!
//! Resources show up in many spellings: plural (`pods`), singular (`pod`),
//! kind (`Pod`) or short name (`po`), with or without their API group. The
//! [`ResourceMapper`] turns all of them into one canonical [`GroupResource`]
//! so they can be used as map keys.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    ConfigMap, Endpoints, Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod,
    ReplicationController, Secret, Service, ServiceAccount,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope, Resource};

use crate::error::ResolutionError;
use crate::models::GroupResource;

/// Everything the adapter needs to know about a kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindInfo {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub singular: String,
    pub short_names: Vec<String>,
    pub namespaced: bool,
}

/// Scope marker types of k8s-openapi resources
pub trait ScopeInfo {
    const NAMESPACED: bool;
}

impl ScopeInfo for NamespaceResourceScope {
    const NAMESPACED: bool = true;
}

impl ScopeInfo for ClusterResourceScope {
    const NAMESPACED: bool = false;
}

impl KindInfo {
    /// Describe a built-in k8s-openapi resource type
    pub fn of<K>(short_names: &[&str]) -> Self
    where
        K: Resource,
        K::Scope: ScopeInfo,
    {
        Self {
            group: K::GROUP.to_string(),
            version: K::VERSION.to_string(),
            kind: K::KIND.to_string(),
            plural: K::URL_PATH_SEGMENT.to_string(),
            singular: K::KIND.to_ascii_lowercase(),
            short_names: short_names.iter().map(|s| s.to_string()).collect(),
            namespaced: <K::Scope as ScopeInfo>::NAMESPACED,
        }
    }

    pub fn group_resource(&self) -> GroupResource {
        GroupResource::new(self.group.clone(), self.plural.clone())
    }

    /// `group/version`, or just `version` for the core group
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    fn answers_to(&self, resource: &str) -> bool {
        self.plural.eq_ignore_ascii_case(resource)
            || self.singular.eq_ignore_ascii_case(resource)
            || self.kind.eq_ignore_ascii_case(resource)
            || self
                .short_names
                .iter()
                .any(|s| s.eq_ignore_ascii_case(resource))
    }
}

/// Resolves resource spellings against the known kinds
pub trait ResourceMapper: Send + Sync {
    /// The kind a resource refers to; an empty group matches any group
    fn kind_for(&self, resource: &GroupResource) -> Result<KindInfo, ResolutionError>;

    /// Canonical (group, plural) form of a resource
    fn normalize(&self, resource: &GroupResource) -> Result<GroupResource, ResolutionError> {
        Ok(self.kind_for(resource)?.group_resource())
    }

    /// Singular name of a resource in any group
    fn singularize(&self, resource: &str) -> Result<String, ResolutionError> {
        Ok(self.kind_for(&GroupResource::core(resource))?.singular)
    }
}

/// A static [`ResourceMapper`]; the first registered kind that matches wins
#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    kinds: Vec<KindInfo>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in Kubernetes kinds, core group first
    pub fn builtin() -> Self {
        Self::new()
            .with_kind(KindInfo::of::<Pod>(&["po"]))
            .with_kind(KindInfo::of::<Node>(&["no"]))
            .with_kind(KindInfo::of::<Namespace>(&["ns"]))
            .with_kind(KindInfo::of::<Service>(&["svc"]))
            .with_kind(KindInfo::of::<ConfigMap>(&["cm"]))
            .with_kind(KindInfo::of::<Secret>(&[]))
            .with_kind(KindInfo::of::<PersistentVolumeClaim>(&["pvc"]))
            .with_kind(KindInfo::of::<PersistentVolume>(&["pv"]))
            .with_kind(KindInfo::of::<ServiceAccount>(&["sa"]))
            .with_kind(KindInfo::of::<Endpoints>(&["ep"]))
            .with_kind(KindInfo::of::<ReplicationController>(&["rc"]))
            .with_kind(KindInfo::of::<Deployment>(&["deploy"]))
            .with_kind(KindInfo::of::<StatefulSet>(&["sts"]))
            .with_kind(KindInfo::of::<DaemonSet>(&["ds"]))
            .with_kind(KindInfo::of::<ReplicaSet>(&["rs"]))
            .with_kind(KindInfo::of::<Job>(&[]))
            .with_kind(KindInfo::of::<CronJob>(&["cj"]))
            .with_kind(KindInfo::of::<HorizontalPodAutoscaler>(&["hpa"]))
            .with_kind(KindInfo::of::<Ingress>(&["ing"]))
    }

    pub fn with_kind(mut self, kind: KindInfo) -> Self {
        self.kinds.push(kind);
        self
    }
}

impl ResourceMapper for KindRegistry {
    fn kind_for(&self, resource: &GroupResource) -> Result<KindInfo, ResolutionError> {
        self.kinds
            .iter()
            .filter(|k| resource.group.is_empty() || k.group.eq_ignore_ascii_case(&resource.group))
            .find(|k| k.answers_to(&resource.resource))
            .cloned()
            .ok_or_else(|| ResolutionError::UnknownResource(resource.clone()))
    }
}
