//! Metrics adapter configuration generator
//!
//! Prints the default discovery rules as YAML, ready to be mounted as the
//! adapter's config file.

use adapter_lib::config::default_config;
use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;

/// Metrics adapter configuration generator
#[derive(Parser, Debug)]
#[command(name = "adapter-config-gen")]
#[command(author, version, about = "Generate the default metrics discovery configuration", long_about = None)]
pub struct Cli {
    /// Rate interval used in the generated queries
    #[arg(long, default_value = "5m", value_parser = humantime::parse_duration)]
    pub rate_interval: Duration,

    /// Prefix of the labels naming Kubernetes resources in application metrics
    #[arg(long, default_value = "")]
    pub label_prefix: String,
}

fn render(cli: &Cli) -> Result<String> {
    default_config(cli.rate_interval, &cli.label_prefix)
        .to_yaml()
        .context("Failed to serialize default config")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    print!("{}", render(&cli)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapter_lib::MetricsDiscoveryConfig;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["adapter-config-gen"]).unwrap();
        assert_eq!(cli.rate_interval, Duration::from_secs(300));
        assert_eq!(cli.label_prefix, "");
    }

    #[test]
    fn test_rendered_config_round_trips() {
        let cli = Cli::try_parse_from([
            "adapter-config-gen",
            "--rate-interval",
            "90s",
            "--label-prefix",
            "kube_",
        ])
        .unwrap();

        let yaml = render(&cli).unwrap();
        assert!(yaml.contains("[1m30s]"));
        assert!(yaml.contains("kube_<<.Resource>>"));

        let parsed = MetricsDiscoveryConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed, default_config(Duration::from_secs(90), "kube_"));
    }

    #[test]
    fn test_invalid_interval() {
        assert!(Cli::try_parse_from(["adapter-config-gen", "--rate-interval", "soon"]).is_err());
    }
}
