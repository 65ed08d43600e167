//! Adapter configuration

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Adapter configuration, read from `ADAPTER_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    /// Base URL of the Prometheus HTTP API
    #[serde(default = "default_prometheus_url")]
    pub prometheus_url: String,

    /// Discovery rules (YAML)
    #[serde(default)]
    pub config_file: Option<String>,

    /// Interval between series discovery cycles in seconds
    #[serde(default = "default_relist_interval")]
    pub metrics_relist_interval_secs: u64,

    /// How far back series are listed during discovery, in seconds
    #[serde(default = "default_max_age")]
    pub metrics_max_age_secs: u64,

    /// API server port for the metrics APIs, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// File holding a bearer token for Prometheus
    #[serde(default)]
    pub prometheus_token_file: Option<String>,

    /// PEM CA bundle used to verify Prometheus
    #[serde(default)]
    pub prometheus_ca_file: Option<String>,
}

fn default_prometheus_url() -> String {
    "https://localhost".to_string()
}

fn default_relist_interval() -> u64 {
    10 * 60
}

fn default_max_age() -> u64 {
    20 * 60
}

fn default_api_port() -> u16 {
    8080
}

impl AdapterConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("ADAPTER").try_parsing(true))
            .build()
            .context("Failed to read adapter configuration")?;

        let config: AdapterConfig = config
            .try_deserialize()
            .context("Invalid adapter configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.metrics_relist_interval_secs == 0 {
            bail!("metrics relist interval must be greater than zero");
        }
        if self.metrics_max_age_secs < self.metrics_relist_interval_secs {
            bail!(
                "metrics max age ({}s) must not be less than the relist interval ({}s)",
                self.metrics_max_age_secs,
                self.metrics_relist_interval_secs
            );
        }
        if self.config_file.as_deref().map_or(true, str::is_empty) {
            bail!("a metrics discovery config file must be given (ADAPTER_CONFIG_FILE)");
        }
        Ok(())
    }

    pub fn relist_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_relist_interval_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.metrics_max_age_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> AdapterConfig {
        AdapterConfig {
            prometheus_url: default_prometheus_url(),
            config_file: Some("/etc/adapter/config.yaml".into()),
            metrics_relist_interval_secs: default_relist_interval(),
            metrics_max_age_secs: default_max_age(),
            api_port: default_api_port(),
            prometheus_token_file: None,
            prometheus_ca_file: None,
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = valid();
        assert!(config.validate().is_ok());
        assert_eq!(config.relist_interval(), Duration::from_secs(600));
        assert_eq!(config.max_age(), Duration::from_secs(1200));
    }

    #[test]
    fn test_max_age_below_relist_interval() {
        let mut config = valid();
        config.metrics_max_age_secs = 60;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must not be less"));
    }

    #[test]
    fn test_zero_relist_interval_rejected() {
        let mut config = valid();
        config.metrics_relist_interval_secs = 0;
        config.metrics_max_age_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("greater than zero"));

        config.metrics_max_age_secs = 1200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_required() {
        let mut config = valid();
        config.config_file = None;
        assert!(config.validate().is_err());
    }
}
