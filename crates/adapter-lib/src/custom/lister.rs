//! Periodic discovery of the available series
//!
//! Each cycle lists the series of every distinct selector concurrently and
//! rebuilds the registry only when all of them were fetched.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::namer::MetricNamer;
use super::registry::SeriesRegistry;
use crate::client::{Interval, PrometheusClient, Selector};
use crate::error::DiscoveryError;
use crate::health::HealthRegistry;
use crate::observability::{AdapterMetrics, StructuredLogger};

/// Configuration for the discovery loop
#[derive(Debug, Clone)]
pub struct ListerConfig {
    /// Time between discovery cycles (default: 10 minutes)
    pub update_interval: Duration,
    /// How far back series are listed (default: 20 minutes)
    pub max_age: Duration,
}

impl Default for ListerConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(10 * 60),
            max_age: Duration::from_secs(20 * 60),
        }
    }
}

/// Keeps a [`SeriesRegistry`] in sync with the series known to the backend
pub struct CachingMetricsLister {
    client: Arc<dyn PrometheusClient>,
    registry: Arc<dyn SeriesRegistry>,
    namers: Vec<Arc<dyn MetricNamer>>,
    config: ListerConfig,
    metrics: AdapterMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
}

impl CachingMetricsLister {
    pub fn new(
        client: Arc<dyn PrometheusClient>,
        registry: Arc<dyn SeriesRegistry>,
        namers: Vec<Arc<dyn MetricNamer>>,
        config: ListerConfig,
    ) -> Self {
        Self {
            client,
            registry,
            namers,
            config,
            metrics: AdapterMetrics::new(),
            logger: StructuredLogger::new("prometheus"),
            health: None,
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Report cycle outcomes to the health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    fn unique_selectors(&self) -> usize {
        self.namers
            .iter()
            .map(|n| n.selector())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Run one discovery cycle and return the number of registered metrics.
    ///
    /// If any selector cannot be listed the registry is left untouched.
    pub async fn update_metrics(&self) -> Result<usize, DiscoveryError> {
        let start = Utc::now() - chrono::Duration::seconds(self.config.max_age.as_secs() as i64);
        let window = Interval::since(start);

        // Rules sharing a selector share one fetch
        let mut seen = HashSet::new();
        let mut tasks = JoinSet::new();
        for namer in &self.namers {
            let selector = namer.selector().clone();
            if !seen.insert(selector.clone()) {
                continue;
            }

            let client = self.client.clone();
            tasks.spawn(async move {
                let result = client.series(window, std::slice::from_ref(&selector)).await;
                (selector, result)
            });
        }

        let mut by_selector: HashMap<Selector, _> = HashMap::with_capacity(seen.len());
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((selector, Ok(series))) => {
                    by_selector.insert(selector, series);
                }
                Ok((selector, Err(e))) => {
                    first_error.get_or_insert(DiscoveryError::Fetch {
                        selector,
                        source: e,
                    });
                }
                Err(e) => {
                    first_error.get_or_insert(DiscoveryError::Task(e.to_string()));
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        let mut series = Vec::with_capacity(self.namers.len());
        for namer in &self.namers {
            let found = by_selector
                .get(namer.selector())
                .ok_or_else(|| DiscoveryError::MissingSelector(namer.selector().clone()))?;
            series.push(namer.filter_series(found));
        }

        debug!(
            selectors = by_selector.len(),
            series = series.iter().map(Vec::len).sum::<usize>(),
            "Setting available metrics"
        );
        self.registry.set_series(series, &self.namers)?;
        Ok(self.registry.list_all_metrics().len())
    }

    /// Run a cycle and record its outcome
    pub async fn run_cycle(&self) -> Result<usize, DiscoveryError> {
        let start = Instant::now();
        let result = self.update_metrics().await;
        let elapsed = start.elapsed().as_secs_f64();

        self.metrics.observe_discovery_cycle(elapsed);
        match &result {
            Ok(count) => {
                self.metrics.set_registered_metrics(*count);
                self.logger
                    .log_discovery_cycle(self.unique_selectors(), *count, elapsed);
            }
            Err(e) => {
                self.metrics.inc_discovery_failures();
                self.logger.log_discovery_failure(&e.to_string());
            }
        }

        if let Some(health) = &self.health {
            let outcome = match &result {
                Ok(count) => Ok(*count),
                Err(e) => Err(e.to_string()),
            };
            health.record_discovery(outcome).await;
        }

        result
    }

    /// Refresh on every tick until shutdown; the first cycle runs immediately.
    /// A cycle in flight when shutdown arrives is allowed to finish.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.update_interval.as_secs(),
            max_age_secs = self.config.max_age.as_secs(),
            rules = self.namers.len(),
            "Starting metrics discovery loop"
        );

        let mut ticker = interval(self.config.update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // failures are already logged and counted
                    let _ = self.run_cycle().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down metrics discovery loop");
                    break;
                }
            }
        }
    }
}
