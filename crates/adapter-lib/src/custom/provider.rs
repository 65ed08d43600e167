//! Custom metrics provider backed by Prometheus

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

use super::lister::{CachingMetricsLister, ListerConfig};
use super::namer::MetricNamer;
use super::registry::{BasicSeriesRegistry, SeriesRegistry};
use crate::client::{PrometheusClient, Sample};
use crate::error::ProviderError;
use crate::models::{milli_quantity, MetricInfo, MetricValue, NamespacedName, ObjectReference};
use crate::naming::{KindInfo, ResourceMapper};

/// The operations behind the custom metrics API
#[async_trait]
pub trait CustomMetricsProvider: Send + Sync {
    fn list_all_metrics(&self) -> Vec<MetricInfo>;

    /// Value of a metric for a single object
    async fn get_metric_by_name(
        &self,
        name: &NamespacedName,
        info: &MetricInfo,
    ) -> Result<MetricValue, ProviderError>;

    /// Values of a metric for every object matching a label selector
    async fn get_metric_by_selector(
        &self,
        namespace: &str,
        selector: &str,
        info: &MetricInfo,
    ) -> Result<Vec<MetricValue>, ProviderError>;
}

/// Resolves label selectors to object names through the cluster API
#[async_trait]
pub trait ObjectLister: Send + Sync {
    /// Names of the objects of `kind` matching `label_selector`; an empty
    /// namespace lists across all namespaces
    async fn list_object_names(
        &self,
        kind: &KindInfo,
        namespace: &str,
        label_selector: &str,
    ) -> anyhow::Result<Vec<String>>;
}

pub struct PrometheusProvider {
    mapper: Arc<dyn ResourceMapper>,
    client: Arc<dyn PrometheusClient>,
    objects: Arc<dyn ObjectLister>,
    registry: Arc<dyn SeriesRegistry>,
}

impl PrometheusProvider {
    /// The provider plus the lister that keeps its registry up to date; the
    /// lister has to be run for the provider to serve anything
    pub fn new(
        mapper: Arc<dyn ResourceMapper>,
        client: Arc<dyn PrometheusClient>,
        objects: Arc<dyn ObjectLister>,
        namers: Vec<Arc<dyn MetricNamer>>,
        config: ListerConfig,
    ) -> (Self, CachingMetricsLister) {
        let registry: Arc<dyn SeriesRegistry> = Arc::new(BasicSeriesRegistry::new(mapper.clone()));
        let lister = CachingMetricsLister::new(client.clone(), registry.clone(), namers, config);
        let provider = Self {
            mapper,
            client,
            objects,
            registry,
        };
        (provider, lister)
    }

    fn metric_for(
        &self,
        value: f64,
        name: &NamespacedName,
        info: &MetricInfo,
    ) -> Result<MetricValue, ProviderError> {
        let kind = self
            .mapper
            .kind_for(&info.group_resource)
            .map_err(|e| ProviderError::Internal(e.to_string()))?;

        Ok(MetricValue {
            described_object: ObjectReference {
                kind: kind.kind.clone(),
                namespace: name.namespace.clone(),
                name: name.name.clone(),
                api_version: kind.api_version(),
            },
            metric_name: info.metric.clone(),
            timestamp: Utc::now(),
            value: milli_quantity(value),
        })
    }

    fn named_values(
        &self,
        info: &MetricInfo,
        samples: &[Sample],
    ) -> Result<HashMap<String, f64>, ProviderError> {
        self.registry
            .match_values_to_names(info, samples)
            .ok_or_else(|| ProviderError::not_found(&info.group_resource, &info.metric))
    }

    async fn query(
        &self,
        info: &MetricInfo,
        namespace: &str,
        names: &[String],
    ) -> Result<Vec<Sample>, ProviderError> {
        let query = self
            .registry
            .query_for_metric(info, namespace, names)
            .ok_or_else(|| ProviderError::not_found(&info.group_resource, &info.metric))?;

        let result = self
            .client
            .query(Some(Utc::now()), &query)
            .await
            .map_err(|e| {
                error!(query = %query, error = %e, "Unable to fetch metrics from Prometheus");
                ProviderError::Internal("unable to fetch metrics".into())
            })?;

        result.into_vector().map_err(|actual| {
            error!(query = %query, expected = "vector", got = %actual, "Unexpected results from Prometheus");
            ProviderError::Internal("unable to fetch metrics".into())
        })
    }
}

#[async_trait]
impl CustomMetricsProvider for PrometheusProvider {
    fn list_all_metrics(&self) -> Vec<MetricInfo> {
        self.registry.list_all_metrics()
    }

    async fn get_metric_by_name(
        &self,
        name: &NamespacedName,
        info: &MetricInfo,
    ) -> Result<MetricValue, ProviderError> {
        let samples = self
            .query(info, &name.namespace, std::slice::from_ref(&name.name))
            .await?;
        if samples.is_empty() {
            return Err(ProviderError::not_found_for(
                &info.group_resource,
                &info.metric,
                &name.name,
            ));
        }

        let values = self.named_values(info, &samples)?;
        if values.len() > 1 {
            debug!(
                results = samples.len(),
                metric = %info,
                object = %name,
                "Got more than one result, using the one with a matching name"
            );
        }

        let value = values.get(&name.name).copied().ok_or_else(|| {
            error!(metric = %info, object = %name, "None of the results matched the resource name");
            ProviderError::not_found_for(&info.group_resource, &info.metric, &name.name)
        })?;
        self.metric_for(value, name, info)
    }

    async fn get_metric_by_selector(
        &self,
        namespace: &str,
        selector: &str,
        info: &MetricInfo,
    ) -> Result<Vec<MetricValue>, ProviderError> {
        let kind = self.mapper.kind_for(&info.group_resource).map_err(|e| {
            error!(metric = %info, error = %e, "Unable to list matching resource names");
            ProviderError::Internal("unable to list matching resources".into())
        })?;
        let names = self
            .objects
            .list_object_names(&kind, namespace, selector)
            .await
            .map_err(|e| {
                error!(metric = %info, selector = %selector, error = %e, "Unable to list matching resource names");
                ProviderError::Internal("unable to list matching resources".into())
            })?;
        if names.is_empty() {
            return Err(ProviderError::not_found(&info.group_resource, &info.metric));
        }

        let samples = self.query(info, namespace, &names).await?;
        let values = self.named_values(info, &samples)?;

        names
            .iter()
            .filter_map(|name| values.get(name).map(|value| (name, *value)))
            .map(|(name, value)| self.metric_for(value, &NamespacedName::new(namespace, name.as_str()), info))
            .collect()
    }
}
