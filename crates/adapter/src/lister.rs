//! Object name lookup through the Kubernetes API

use adapter_lib::custom::ObjectLister;
use adapter_lib::naming::KindInfo;
use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::api::{Api, ListParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::Client;
use tracing::debug;

/// Lists objects of any kind with the dynamic API
#[derive(Clone)]
pub struct KubeObjectLister {
    client: Client,
}

impl KubeObjectLister {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: &KindInfo, namespace: &str) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(&kind.group, &kind.version, &kind.kind);
        let resource = ApiResource::from_gvk_with_plural(&gvk, &kind.plural);
        if kind.namespaced && !namespace.is_empty() {
            Api::namespaced_with(self.client.clone(), namespace, &resource)
        } else {
            Api::all_with(self.client.clone(), &resource)
        }
    }
}

#[async_trait]
impl ObjectLister for KubeObjectLister {
    async fn list_object_names(
        &self,
        kind: &KindInfo,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<String>> {
        let mut params = ListParams::default();
        if !label_selector.is_empty() {
            params = params.labels(label_selector);
        }

        let objects = self
            .api(kind, namespace)
            .list(&params)
            .await
            .with_context(|| format!("Failed to list {} matching {:?}", kind.plural, label_selector))?;

        let names: Vec<String> = objects
            .items
            .into_iter()
            .filter_map(|object| object.metadata.name)
            .collect();
        debug!(kind = %kind.kind, namespace = %namespace, selector = %label_selector, count = names.len(), "Listed objects");
        Ok(names)
    }
}
