//! naming-watch configuration file

use anyhow::{Context, Result};
use resolver_naming::{Instance, WatchOptions, DEFAULT_GROUP};
use resolver_session::{BuilderConfig, DEFAULT_SCHEME};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_ENV: &str = "NAMING_WATCH_CONFIG";
pub const POLL_ENV: &str = "NAMING_WATCH_POLL_SECS";
pub const DEFAULT_CONFIG_PATH: &str = "naming-watch.yaml";

#[derive(Clone, Debug, Deserialize)]
pub struct WatchConfig {
    /// Target to resolve, e.g. `nacos://orders?group_name=DEFAULT_GROUP`
    pub target: String,

    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Group for targets without `group_name`
    #[serde(default)]
    pub group: String,

    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Seconds between reloads of the registry contents
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Registry contents
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServiceEntry {
    #[serde(default = "default_group")]
    pub group: String,
    pub service: String,
    #[serde(default)]
    pub instances: Vec<Instance>,
}

fn default_scheme() -> String {
    DEFAULT_SCHEME.to_string()
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

fn default_channel_capacity() -> usize {
    1
}

fn default_poll_interval_secs() -> u64 {
    5
}

impl WatchConfig {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: WatchConfig = serde_yaml::from_str(raw).context("Invalid naming-watch config")?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&raw)
    }

    /// Path from `NAMING_WATCH_CONFIG`, or the default
    pub fn path_from_env() -> String {
        std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Poll interval, overridden by `NAMING_WATCH_POLL_SECS` when set
    pub fn poll_interval(&self) -> Duration {
        let secs = std::env::var(POLL_ENV)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(self.poll_interval_secs);
        Duration::from_secs(secs.max(1))
    }

    pub fn builder_config(&self) -> BuilderConfig {
        BuilderConfig {
            scheme: self.scheme.clone(),
            group: self.group.clone(),
            watch: WatchOptions {
                channel_capacity: self.channel_capacity,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = WatchConfig::from_yaml(
            r#"
target: nacos://orders?group_name=payments
group: payments
channel_capacity: 4
poll_interval_secs: 2
services:
  - group: payments
    service: orders
    instances:
      - ip: 10.0.0.1
        port: 9000
        cluster_name: sh
        metadata:
          zone: sh-1
      - ip: 10.0.0.2
        port: 9000
        healthy: false
"#,
        )
        .unwrap();

        assert_eq!(config.scheme, "nacos");
        assert_eq!(config.services.len(), 1);
        let instances = &config.services[0].instances;
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].metadata.get("zone").map(String::as_str), Some("sh-1"));
        assert!(instances[0].enabled);
        assert!(!instances[1].healthy);

        let builder = config.builder_config();
        assert_eq!(builder.group, "payments");
        assert_eq!(builder.watch.channel_capacity, 4);
    }

    #[test]
    fn test_defaults() {
        let config =
            WatchConfig::from_yaml("target: orders\nservices:\n  - service: orders\n").unwrap();
        assert_eq!(config.group, "");
        assert_eq!(config.channel_capacity, 1);
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.services[0].group, DEFAULT_GROUP);
        assert!(config.services[0].instances.is_empty());
    }

    #[test]
    fn test_missing_target() {
        assert!(WatchConfig::from_yaml("group: payments\n").is_err());
    }
}
