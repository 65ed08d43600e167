//! HTTP implementation of the Prometheus client

use super::types::{ApiResponse, ErrorType, ResponseStatus};
use super::{Interval, PrometheusClient, QueryResult, Range, Selector, Series};
use crate::error::ClientError;
use crate::observability::AdapterMetrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use std::time::Instant;
use tracing::debug;
use url::Url;

const QUERY_URL: &str = "/api/v1/query";
const QUERY_RANGE_URL: &str = "/api/v1/query_range";
const SERIES_URL: &str = "/api/v1/series";

/// Raw access to the Prometheus HTTP API: one request, one decoded envelope
#[async_trait]
pub trait GenericApiClient: Send + Sync {
    async fn do_request(
        &self,
        verb: Method,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<ApiResponse, ClientError>;
}

/// [`GenericApiClient`] backed by reqwest
pub struct HttpApiClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpApiClient {
    pub fn new(client: reqwest::Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Join the endpoint onto the base URL path, keeping any path prefix
    fn endpoint_url(&self, endpoint: &str) -> Url {
        let mut url = self.base_url.clone();
        let path = format!(
            "{}/{}",
            self.base_url.path().trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        url.set_path(&path);
        url
    }
}

#[async_trait]
impl GenericApiClient for HttpApiClient {
    async fn do_request(
        &self,
        verb: Method,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<ApiResponse, ClientError> {
        let url = self.endpoint_url(endpoint);

        let response = self
            .client
            .request(verb.clone(), url.clone())
            .query(params)
            .send()
            .await?;

        let status = response.status();
        debug!(verb = %verb, url = %url, status = %status, "Prometheus request");

        // Prometheus reports query errors with these codes and a JSON body
        let code = status.as_u16();
        if !status.is_success() && !matches!(code, 400 | 422 | 503) {
            return Err(ClientError::Api {
                kind: ErrorType::BadResponse,
                message: format!("unknown response code {}", code),
            });
        }

        let body = response.bytes().await?;
        let decoded: ApiResponse =
            serde_json::from_slice(&body).map_err(|e| ClientError::Api {
                kind: ErrorType::BadResponse,
                message: e.to_string(),
            })?;

        if decoded.status == ResponseStatus::Error {
            return Err(ClientError::Api {
                kind: decoded.error_type.clone().unwrap_or(ErrorType::Unknown),
                message: decoded.error.clone(),
            });
        }

        Ok(decoded)
    }
}

/// Records request latency per endpoint for a wrapped client
pub struct InstrumentedApiClient<C> {
    inner: C,
    server_name: String,
    metrics: AdapterMetrics,
}

impl<C: GenericApiClient> InstrumentedApiClient<C> {
    pub fn new(inner: C, server_name: impl Into<String>, metrics: AdapterMetrics) -> Self {
        Self {
            inner,
            server_name: server_name.into(),
            metrics,
        }
    }
}

#[async_trait]
impl<C: GenericApiClient> GenericApiClient for InstrumentedApiClient<C> {
    async fn do_request(
        &self,
        verb: Method,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<ApiResponse, ClientError> {
        let start = Instant::now();
        let result = self.inner.do_request(verb, endpoint, params).await;

        // Transport failures say nothing about server latency
        let observed = match &result {
            Ok(_) => true,
            Err(e) => e.is_api_error(),
        };
        if observed {
            self.metrics.observe_query_latency(
                endpoint,
                &self.server_name,
                start.elapsed().as_secs_f64(),
            );
        }

        result
    }
}

/// [`PrometheusClient`] on top of any [`GenericApiClient`]
pub struct QueryClient<C> {
    api: C,
}

impl<C: GenericApiClient> QueryClient<C> {
    pub fn new(api: C) -> Self {
        Self { api }
    }
}

impl QueryClient<HttpApiClient> {
    /// Plain HTTP client without instrumentation
    pub fn http(client: reqwest::Client, base_url: Url) -> Self {
        Self::new(HttpApiClient::new(client, base_url))
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    format!("{:.3}", time.timestamp_millis() as f64 / 1000.0)
}

#[async_trait]
impl<C: GenericApiClient> PrometheusClient for QueryClient<C> {
    async fn series(
        &self,
        interval: Interval,
        selectors: &[Selector],
    ) -> Result<Vec<Series>, ClientError> {
        let mut params = Vec::with_capacity(selectors.len() + 2);
        if let Some(start) = interval.start {
            params.push(("start".to_string(), format_time(start)));
        }
        if let Some(end) = interval.end {
            params.push(("end".to_string(), format_time(end)));
        }
        for selector in selectors {
            params.push(("match[]".to_string(), selector.0.clone()));
        }

        let response = self.api.do_request(Method::GET, SERIES_URL, &params).await?;
        Ok(serde_json::from_value(response.data)?)
    }

    async fn query(
        &self,
        time: Option<DateTime<Utc>>,
        query: &Selector,
    ) -> Result<QueryResult, ClientError> {
        let mut params = vec![("query".to_string(), query.0.clone())];
        if let Some(time) = time {
            params.push(("time".to_string(), format_time(time)));
        }

        let response = self.api.do_request(Method::GET, QUERY_URL, &params).await?;
        Ok(serde_json::from_value(response.data)?)
    }

    async fn query_range(
        &self,
        range: Range,
        query: &Selector,
    ) -> Result<QueryResult, ClientError> {
        let mut params = vec![("query".to_string(), query.0.clone())];
        if let Some(start) = range.start {
            params.push(("start".to_string(), format_time(start)));
        }
        if let Some(end) = range.end {
            params.push(("end".to_string(), format_time(end)));
        }
        if let Some(step) = range.step {
            params.push(("step".to_string(), step.as_secs_f64().to_string()));
        }

        let response = self
            .api
            .do_request(Method::GET, QUERY_RANGE_URL, &params)
            .await?;
        Ok(serde_json::from_value(response.data)?)
    }
}
