use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::limiter::{AdaptiveSettings, FixedSettings};
use crate::strategy::SmartSettings;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub prometheus: PrometheusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8650,
        }
    }
}

/// Queue broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Gate the whole driver; mutating routes answer 503 when off.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Key prefix, wire compatible with existing deployments.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Partition used when nothing resolves one.
    #[serde(default = "default_partition")]
    pub default_partition: String,
    /// Name resolved against the strategy registry.
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Name resolved against the limiter registry.
    #[serde(default = "default_limiter")]
    pub limiter: String,
    #[serde(default)]
    pub strategies: StrategiesConfig,
    #[serde(default)]
    pub limiters: LimitersConfig,
}

fn default_true() -> bool {
    true
}

fn default_prefix() -> String {
    "balanced-queue".to_string()
}

fn default_partition() -> String {
    "default".to_string()
}

fn default_strategy() -> String {
    "round-robin".to_string()
}

fn default_limiter() -> String {
    "simple".to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: default_prefix(),
            default_partition: default_partition(),
            strategy: default_strategy(),
            limiter: default_limiter(),
            strategies: StrategiesConfig::default(),
            limiters: LimitersConfig::default(),
        }
    }
}

/// Per-strategy settings bags
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategiesConfig {
    #[serde(default)]
    pub smart: SmartSettings,
}

/// Per-limiter settings bags
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitersConfig {
    #[serde(default)]
    pub simple: FixedSettings,
    #[serde(default)]
    pub adaptive: AdaptiveSettings,
}

/// Delayed-job promotion & expired-key purge task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

fn default_sweep_interval() -> u64 {
    5
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

/// Metrics endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_route")]
    pub route: String,
    #[serde(default)]
    pub middleware: MetricsMiddleware,
    /// Exact addresses and CIDR ranges (v4 and v6). Empty list denies all.
    #[serde(default)]
    pub ip_whitelist: Vec<String>,
    #[serde(default)]
    pub basic_auth: Option<BasicAuthConfig>,
}

fn default_metrics_route() -> String {
    "/metrics".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            route: default_metrics_route(),
            middleware: MetricsMiddleware::default(),
            ip_whitelist: Vec::new(),
            basic_auth: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsMiddleware {
    IpWhitelist,
    BasicAuth,
    #[default]
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: String,
}

impl ServerConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Get server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: Server::default(),
            broker: BrokerConfig::default(),
            sweeper: SweeperConfig::default(),
            logging: LoggingConfig::default(),
            prometheus: PrometheusConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert!(config.broker.enabled);
        assert_eq!(config.broker.prefix, "balanced-queue");
        assert_eq!(config.broker.strategy, "round-robin");
        assert_eq!(config.broker.limiter, "simple");
        assert_eq!(config.broker.limiters.simple.max_concurrent, 10);
        assert_eq!(config.broker.strategies.smart.small_queue_threshold, 5);
        assert_eq!(config.prometheus.middleware, MetricsMiddleware::None);
        assert_eq!(config.server_addr(), "0.0.0.0:8650");
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
broker:
  strategy: "smart"
  limiters:
    simple:
      max_concurrent: 3
prometheus:
  middleware: "ip_whitelist"
  ip_whitelist: ["127.0.0.1", "10.0.0.0/8"]
"#;
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.broker.strategy, "smart");
        assert_eq!(config.broker.limiter, "simple");
        assert_eq!(config.broker.limiters.simple.max_concurrent, 3);
        assert_eq!(config.broker.limiters.simple.lock_ttl, 300);
        assert_eq!(config.prometheus.middleware, MetricsMiddleware::IpWhitelist);
        assert_eq!(config.prometheus.ip_whitelist.len(), 2);
        assert_eq!(config.server.port, 8650);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "server:\n  host: \"127.0.0.1\"\n  port: 9000\nbroker:\n  limiter: \"adaptive\"\n"
        )
        .unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server_addr(), "127.0.0.1:9000");
        assert_eq!(config.broker.limiter, "adaptive");
        assert_eq!(config.broker.limiters.adaptive.base_limit, 5);
    }
}
