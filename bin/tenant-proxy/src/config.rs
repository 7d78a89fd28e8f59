//! Daemon configuration: YAML file plus environment overrides

use anyhow::{bail, Context, Result};
use proxy_engine::ProxierConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Names the YAML configuration file
pub const CONFIG_ENV: &str = "TENANT_PROXY_CONFIG";

/// Networking API connection settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub endpoint: String,
    pub token: String,
    pub timeout_seconds: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token: String::new(),
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Node name, compared against endpoint node names
    pub hostname: String,
    pub min_sync_period_seconds: u64,
    pub sync_period_seconds: u64,
    pub burst_syncs: u32,
    /// Upper bound for every ip/iptables invocation
    pub command_timeout_seconds: u64,
    pub metrics_addr: SocketAddr,
    pub provider: ProviderConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            min_sync_period_seconds: 1,
            sync_period_seconds: 30,
            burst_syncs: 2,
            command_timeout_seconds: 10,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 10249)),
            provider: ProviderConfig::default(),
        }
    }
}

fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("invalid value {:?} for {}", value, name))
}

impl ProxyConfig {
    /// Load from `TENANT_PROXY_CONFIG` (if set), apply environment
    /// overrides, then validate.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml(&data)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }

    /// Override fields from `TENANT_PROXY_*` variables resolved by `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TENANT_PROXY_HOSTNAME") {
            self.hostname = v;
        }
        if let Some(v) = lookup("TENANT_PROXY_MIN_SYNC_PERIOD_SECONDS") {
            self.min_sync_period_seconds = parse_env("TENANT_PROXY_MIN_SYNC_PERIOD_SECONDS", &v)?;
        }
        if let Some(v) = lookup("TENANT_PROXY_SYNC_PERIOD_SECONDS") {
            self.sync_period_seconds = parse_env("TENANT_PROXY_SYNC_PERIOD_SECONDS", &v)?;
        }
        if let Some(v) = lookup("TENANT_PROXY_BURST_SYNCS") {
            self.burst_syncs = parse_env("TENANT_PROXY_BURST_SYNCS", &v)?;
        }
        if let Some(v) = lookup("TENANT_PROXY_COMMAND_TIMEOUT_SECONDS") {
            self.command_timeout_seconds = parse_env("TENANT_PROXY_COMMAND_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = lookup("TENANT_PROXY_METRICS_ADDR") {
            self.metrics_addr = parse_env("TENANT_PROXY_METRICS_ADDR", &v)?;
        }
        if let Some(v) = lookup("TENANT_PROXY_PROVIDER_ENDPOINT") {
            self.provider.endpoint = v;
        }
        if let Some(v) = lookup("TENANT_PROXY_PROVIDER_TOKEN") {
            self.provider.token = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync_period_seconds == 0 {
            bail!("sync_period_seconds must be at least 1");
        }
        if self.min_sync_period_seconds > self.sync_period_seconds {
            bail!(
                "min_sync_period_seconds ({}) must not exceed sync_period_seconds ({})",
                self.min_sync_period_seconds,
                self.sync_period_seconds
            );
        }
        if self.burst_syncs == 0 {
            bail!("burst_syncs must be at least 1");
        }
        if self.command_timeout_seconds == 0 {
            bail!("command_timeout_seconds must be at least 1");
        }
        if self.provider.endpoint.is_empty() {
            bail!("provider.endpoint is required (set TENANT_PROXY_PROVIDER_ENDPOINT)");
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider.timeout_seconds)
    }

    pub fn proxier_config(&self) -> ProxierConfig {
        ProxierConfig {
            hostname: self.hostname.clone(),
            min_sync_period: Duration::from_secs(self.min_sync_period_seconds),
            sync_period: Duration::from_secs(self.sync_period_seconds),
            burst_syncs: self.burst_syncs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid_config() -> ProxyConfig {
        ProxyConfig {
            provider: ProviderConfig {
                endpoint: "http://neutron:9696".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::default();
        assert_eq!(config.min_sync_period_seconds, 1);
        assert_eq!(config.sync_period_seconds, 30);
        assert_eq!(config.burst_syncs, 2);
        assert_eq!(config.command_timeout_seconds, 10);
        assert_eq!(config.metrics_addr.port(), 10249);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = ProxyConfig::from_yaml(
            "hostname: node-1\nsync_period_seconds: 60\nprovider:\n  endpoint: http://neutron:9696\n",
        )
        .expect("Failed to parse config");

        assert_eq!(config.hostname, "node-1");
        assert_eq!(config.sync_period_seconds, 60);
        assert_eq!(config.min_sync_period_seconds, 1);
        assert_eq!(config.provider.endpoint, "http://neutron:9696");
        assert_eq!(config.provider.timeout_seconds, 10);
    }

    #[test]
    fn test_env_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("TENANT_PROXY_HOSTNAME", "node-2"),
            ("TENANT_PROXY_BURST_SYNCS", "5"),
            ("TENANT_PROXY_METRICS_ADDR", "127.0.0.1:9000"),
            ("TENANT_PROXY_PROVIDER_TOKEN", "secret"),
        ]
        .into_iter()
        .collect();

        let mut config = valid_config();
        config
            .apply_env(|name| env.get(name).map(|v| v.to_string()))
            .expect("Failed to apply env");

        assert_eq!(config.hostname, "node-2");
        assert_eq!(config.burst_syncs, 5);
        assert_eq!(config.metrics_addr, "127.0.0.1:9000".parse().expect("addr"));
        assert_eq!(config.provider.token, "secret");
        assert_eq!(config.provider.endpoint, "http://neutron:9696");
    }

    #[test]
    fn test_bad_env_value_is_rejected() {
        let mut config = valid_config();
        let err = config
            .apply_env(|name| (name == "TENANT_PROXY_BURST_SYNCS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("TENANT_PROXY_BURST_SYNCS"));
    }

    #[test]
    fn test_validation() {
        assert!(valid_config().validate().is_ok());

        let mut config = valid_config();
        config.min_sync_period_seconds = 60;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.burst_syncs = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.min_sync_period_seconds = 0;
        assert!(config.validate().is_ok());
        config.sync_period_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.provider.endpoint.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_proxier_config() {
        let mut config = valid_config();
        config.hostname = "node-3".to_string();
        let proxier = config.proxier_config();
        assert_eq!(proxier.hostname, "node-3");
        assert_eq!(proxier.min_sync_period, Duration::from_secs(1));
        assert_eq!(proxier.sync_period, Duration::from_secs(30));
        assert_eq!(proxier.burst_syncs, 2);
    }
}
