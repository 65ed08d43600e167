//! Construction of the Prometheus client from the adapter configuration

use adapter_lib::client::{HttpApiClient, InstrumentedApiClient, PrometheusClient, QueryClient};
use adapter_lib::AdapterMetrics;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::config::AdapterConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client honouring the optional bearer token and CA bundle
pub fn http_client(config: &AdapterConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);

    if let Some(path) = &config.prometheus_ca_file {
        let pem = std::fs::read(path)
            .with_context(|| format!("Failed to read Prometheus CA file {}", path))?;
        let certificate = reqwest::Certificate::from_pem(&pem)
            .with_context(|| format!("Invalid Prometheus CA file {}", path))?;
        builder = builder.add_root_certificate(certificate);
    }

    if let Some(path) = &config.prometheus_token_file {
        let token = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read Prometheus token file {}", path))?;
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .context("Prometheus token is not a valid header value")?;
        value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);
        builder = builder.default_headers(headers);
    }

    builder.build().context("Failed to build HTTP client")
}

/// Instrumented Prometheus client for the configured server
pub fn prometheus_client(
    config: &AdapterConfig,
    metrics: AdapterMetrics,
) -> Result<Arc<dyn PrometheusClient>> {
    let base_url = Url::parse(&config.prometheus_url)
        .with_context(|| format!("Invalid Prometheus URL {}", config.prometheus_url))?;
    let server = base_url.to_string();

    let api = HttpApiClient::new(http_client(config)?, base_url);
    let client = QueryClient::new(InstrumentedApiClient::new(api, server, metrics));
    Ok(Arc::new(client))
}
