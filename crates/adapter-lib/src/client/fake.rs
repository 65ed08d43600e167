//! In-memory Prometheus client for tests

use super::{Interval, PrometheusClient, QueryResult, Range, Selector, Series};
use crate::client::ErrorType;
use crate::error::ClientError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Serves canned series and query results keyed by selector.
///
/// Selectors registered with [`FakePrometheusClient::with_error`] fail with an
/// execution error. Unknown queries return an empty vector, unknown series
/// selectors return no series. Series calls are counted per selector.
#[derive(Default)]
pub struct FakePrometheusClient {
    series_results: HashMap<Selector, Vec<Series>>,
    query_results: HashMap<Selector, QueryResult>,
    errors: HashMap<Selector, String>,
    series_calls: Mutex<HashMap<Selector, usize>>,
    last_interval: Mutex<Option<Interval>>,
}

impl FakePrometheusClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, selector: impl Into<Selector>, series: Vec<Series>) -> Self {
        self.series_results.insert(selector.into(), series);
        self
    }

    pub fn with_query_result(mut self, query: impl Into<Selector>, result: QueryResult) -> Self {
        self.query_results.insert(query.into(), result);
        self
    }

    pub fn with_error(mut self, selector: impl Into<Selector>, message: impl Into<String>) -> Self {
        self.errors.insert(selector.into(), message.into());
        self
    }

    /// Number of series requests that included the selector
    pub fn series_calls(&self, selector: &Selector) -> usize {
        self.series_calls.lock().get(selector).copied().unwrap_or(0)
    }

    /// Total number of selectors requested through `series`
    pub fn total_series_calls(&self) -> usize {
        self.series_calls.lock().values().sum()
    }

    pub fn last_interval(&self) -> Option<Interval> {
        *self.last_interval.lock()
    }

    fn error_for(&self, selector: &Selector) -> Option<ClientError> {
        self.errors.get(selector).map(|message| ClientError::Api {
            kind: ErrorType::Execution,
            message: message.clone(),
        })
    }
}

#[async_trait]
impl PrometheusClient for FakePrometheusClient {
    async fn series(
        &self,
        interval: Interval,
        selectors: &[Selector],
    ) -> Result<Vec<Series>, ClientError> {
        *self.last_interval.lock() = Some(interval);

        let mut result = Vec::new();
        for selector in selectors {
            *self.series_calls.lock().entry(selector.clone()).or_default() += 1;
            if let Some(err) = self.error_for(selector) {
                return Err(err);
            }
            if let Some(series) = self.series_results.get(selector) {
                result.extend(series.iter().cloned());
            }
        }
        Ok(result)
    }

    async fn query(
        &self,
        _time: Option<DateTime<Utc>>,
        query: &Selector,
    ) -> Result<QueryResult, ClientError> {
        if let Some(err) = self.error_for(query) {
            return Err(err);
        }
        Ok(self
            .query_results
            .get(query)
            .cloned()
            .unwrap_or_else(|| QueryResult::Vector(Vec::new())))
    }

    async fn query_range(
        &self,
        _range: Range,
        query: &Selector,
    ) -> Result<QueryResult, ClientError> {
        if let Some(err) = self.error_for(query) {
            return Err(err);
        }
        Ok(QueryResult::Matrix(Vec::new()))
    }
}
