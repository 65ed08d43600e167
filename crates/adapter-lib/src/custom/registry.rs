//! Registry of the metrics currently available
//!
//! The registry is rebuilt from scratch on every discovery cycle and swapped
//! in as a whole, so readers see either the previous or the new set of
//! metrics and never a mix of both.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::namer::MetricNamer;
use crate::client::{Sample, Selector, Series};
use crate::error::DiscoveryError;
use crate::models::MetricInfo;
use crate::naming::ResourceMapper;

/// Source of the metrics served through the custom metrics API
pub trait SeriesRegistry: Send + Sync {
    /// Replace the known metrics with those derived from `series`, which
    /// holds the filtered series of each namer, in namer order
    fn set_series(
        &self,
        series: Vec<Vec<Series>>,
        namers: &[Arc<dyn MetricNamer>],
    ) -> Result<(), DiscoveryError>;

    fn list_all_metrics(&self) -> Vec<MetricInfo>;

    /// Query fetching `info` for the named objects; `None` if the metric is
    /// unknown or no names were given
    fn query_for_metric(
        &self,
        info: &MetricInfo,
        namespace: &str,
        names: &[String],
    ) -> Option<Selector>;

    /// Sample values keyed by the name of the object they describe
    fn match_values_to_names(
        &self,
        info: &MetricInfo,
        values: &[Sample],
    ) -> Option<HashMap<String, f64>>;
}

#[derive(Clone)]
struct SeriesInfo {
    series_name: String,
    namer: Arc<dyn MetricNamer>,
}

#[derive(Default)]
struct RegistrySnapshot {
    info: HashMap<MetricInfo, SeriesInfo>,
    metrics: Vec<MetricInfo>,
}

pub struct BasicSeriesRegistry {
    snapshot: RwLock<Arc<RegistrySnapshot>>,
    mapper: Arc<dyn ResourceMapper>,
}

impl BasicSeriesRegistry {
    pub fn new(mapper: Arc<dyn ResourceMapper>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(RegistrySnapshot::default())),
            mapper,
        }
    }

    fn current(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.read().clone()
    }

    /// Normalize `info` and find the series that backs it
    fn lookup(&self, info: &MetricInfo) -> Option<(MetricInfo, SeriesInfo)> {
        let info = match info.normalized(self.mapper.as_ref()) {
            Ok(info) => info,
            Err(e) => {
                error!(metric = %info, error = %e, "Unable to normalize group resource");
                return None;
            }
        };

        let found = self.current().info.get(&info).cloned();
        match found {
            Some(series) => Some((info, series)),
            None => {
                debug!(metric = %info, "Metric not registered");
                None
            }
        }
    }
}

impl SeriesRegistry for BasicSeriesRegistry {
    fn set_series(
        &self,
        series: Vec<Vec<Series>>,
        namers: &[Arc<dyn MetricNamer>],
    ) -> Result<(), DiscoveryError> {
        if series.len() != namers.len() {
            return Err(DiscoveryError::Mismatch {
                series: series.len(),
                namers: namers.len(),
            });
        }

        let mut info = HashMap::new();
        for (namer, namer_series) in namers.iter().zip(series) {
            for series in namer_series {
                let (resources, namespaced) = namer.resources_for_series(&series);
                let name = match namer.metric_name_for_series(&series) {
                    Ok(name) => name,
                    Err(e) => {
                        warn!(series = %series, error = %e, "Unable to name series, skipping");
                        continue;
                    }
                };

                for resource in resources {
                    // metrics about namespaces are not themselves namespaced
                    let namespaced = namespaced && !resource.is_namespace();
                    info.insert(
                        MetricInfo::new(resource, namespaced, name.clone()),
                        SeriesInfo {
                            series_name: series.name.clone(),
                            namer: namer.clone(),
                        },
                    );
                }
            }
        }

        let mut metrics: Vec<MetricInfo> = info.keys().cloned().collect();
        metrics.sort();

        *self.snapshot.write() = Arc::new(RegistrySnapshot { info, metrics });
        Ok(())
    }

    fn list_all_metrics(&self) -> Vec<MetricInfo> {
        self.current().metrics.clone()
    }

    fn query_for_metric(
        &self,
        info: &MetricInfo,
        namespace: &str,
        names: &[String],
    ) -> Option<Selector> {
        if names.is_empty() {
            error!(metric = %info, "No resource names requested while producing a query");
            return None;
        }

        let (info, series) = self.lookup(info)?;
        match series
            .namer
            .query_for_series(&series.series_name, &info.group_resource, namespace, names)
        {
            Ok(query) => Some(query),
            Err(e) => {
                error!(metric = %info, error = %e, "Unable to construct query for metric");
                None
            }
        }
    }

    fn match_values_to_names(
        &self,
        info: &MetricInfo,
        values: &[Sample],
    ) -> Option<HashMap<String, f64>> {
        let (info, series) = self.lookup(info)?;
        let label = match series.namer.label_for_resource(&info.group_resource) {
            Ok(label) => label,
            Err(e) => {
                error!(metric = %info, error = %e, "Unable to construct resource label for metric");
                return None;
            }
        };

        Some(
            values
                .iter()
                .map(|sample| {
                    let name = sample.metric.get(&label).cloned().unwrap_or_default();
                    (name, sample.value)
                })
                .collect(),
        )
    }
}
