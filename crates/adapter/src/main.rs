//! Metrics adapter - serves Prometheus series through the Kubernetes
//! custom and resource metrics APIs

use adapter_lib::{
    custom::{namers_from_config, ListerConfig, PrometheusProvider},
    health::{components, HealthRegistry},
    naming::{KindRegistry, ResourceMapper},
    observability::{AdapterMetrics, StructuredLogger},
    MetricsDiscoveryConfig, MetricsProvider, ResourceMetricsProvider,
};
use anyhow::{Context, Result};
use metrics_adapter::{api, backend, config, lister::KubeObjectLister};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const ADAPTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting metrics-adapter");

    // Load configuration
    let config = config::AdapterConfig::load()?;
    let config_file = config.config_file.clone().unwrap_or_default();
    let discovery = MetricsDiscoveryConfig::from_file(&config_file)
        .with_context(|| format!("Failed to load metrics discovery config {}", config_file))?;
    info!(
        prometheus_url = %config.prometheus_url,
        rules = discovery.rules.len(),
        "Adapter configured"
    );

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::DISCOVERY).await;
    health_registry.register(components::BACKEND).await;

    // Initialize metrics and structured logger
    let metrics = AdapterMetrics::new();
    let logger = StructuredLogger::new(config.prometheus_url.clone());

    let mapper: Arc<dyn ResourceMapper> = Arc::new(KindRegistry::builtin());
    let client = backend::prometheus_client(&config, metrics)?;
    let namers = namers_from_config(&discovery, mapper.clone())
        .context("Invalid metrics discovery rules")?;

    let kube_client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let objects = Arc::new(KubeObjectLister::new(kube_client));

    let (custom, discovery_loop) = PrometheusProvider::new(
        mapper.clone(),
        client.clone(),
        objects,
        namers,
        ListerConfig {
            update_interval: config.relist_interval(),
            max_age: config.max_age(),
        },
    );
    let discovery_loop = discovery_loop
        .with_logger(logger.clone())
        .with_health(health_registry.clone());

    let resources: Option<Arc<dyn MetricsProvider>> = match &discovery.resource_rules {
        Some(rules) => {
            health_registry.register(components::RESOURCE_METRICS).await;
            let provider = ResourceMetricsProvider::new(client, mapper, rules)
                .context("Invalid resource rules")?
                .with_health(health_registry.clone());
            Some(Arc::new(provider))
        }
        None => None,
    };

    logger.log_startup(ADAPTER_VERSION, discovery.rules.len(), resources.is_some());

    // Create shared application state
    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        Arc::new(custom),
        resources,
    ));

    let (shutdown_tx, _) = broadcast::channel(1);

    // Start the discovery loop and the API server
    let discovery_handle = tokio::spawn(discovery_loop.run(shutdown_tx.subscribe()));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, shutdown_tx.subscribe()));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    info!("Shutting down");

    let _ = shutdown_tx.send(());
    if let Err(e) = discovery_handle.await {
        error!(error = %e, "Discovery loop terminated abnormally");
    }
    match api_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server terminated abnormally"),
    }

    Ok(())
}
