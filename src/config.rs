//! Configuration management for the audio gateway

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Configuration for the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address the gateway listens on (default: 0.0.0.0:8080)
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Ordered origin worker base URLs
    ///
    /// The order is part of the placement function: reordering the list moves
    /// identifiers to different workers.
    #[serde(default)]
    pub workers: Vec<String>,

    /// Route prefix stripped before the identifier is taken from the path (default: /api)
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// Whether to enable the edge cache (default: true)
    #[serde(default = "default_true")]
    pub enable_cache: bool,

    /// Edge cache freshness horizon in seconds (default: 950400 = 11 days)
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,

    /// `max-age` advertised to clients and shared caches in seconds (default: 864000 = 10 days)
    #[serde(default = "default_client_max_age")]
    pub client_max_age: u64,

    /// L1 (memory) cache size in bytes (default: 256MB)
    #[serde(default = "default_l1_cache_size")]
    pub l1_cache_size_bytes: usize,

    /// Largest object admitted to the cache in bytes (default: 64MB)
    #[serde(default = "default_max_cacheable")]
    pub max_cacheable_bytes: usize,

    /// Whether to persist cached objects on disk (default: false)
    #[serde(default)]
    pub enable_l2_cache: bool,

    /// L2 (disk) cache directory (default: /var/cache/audio-gateway)
    #[serde(default = "default_l2_cache_dir")]
    pub l2_cache_dir: String,

    /// Upper bound on the bytes kept in the L2 directory (default: 10GB)
    #[serde(default = "default_l2_max_size")]
    pub l2_max_size_bytes: u64,

    /// Interval between sweeps of the L2 directory in seconds (default: 600)
    #[serde(default = "default_l2_sweep_interval")]
    pub l2_sweep_interval_secs: u64,

    /// Upstream connect timeout in milliseconds (default: 5000)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Upstream header and per-read timeout in milliseconds (default: 30000)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Metrics endpoint configuration (optional)
    #[serde(default)]
    pub metrics_endpoint: Option<MetricsEndpointConfig>,
}

/// Configuration for the metrics HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsEndpointConfig {
    /// Whether to enable the metrics endpoint (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind the metrics endpoint to (default: "127.0.0.1:9090")
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsEndpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

// Default value functions for serde
fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_path_prefix() -> String {
    "/api".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    11 * 86400 // 11 days
}

fn default_client_max_age() -> u64 {
    10 * 86400 // 10 days
}

fn default_l1_cache_size() -> usize {
    256 * 1024 * 1024 // 256MB
}

fn default_max_cacheable() -> usize {
    64 * 1024 * 1024 // 64MB
}

fn default_l2_cache_dir() -> String {
    "/var/cache/audio-gateway".to_string()
}

fn default_l2_max_size() -> u64 {
    10 * 1024 * 1024 * 1024 // 10GB
}

fn default_l2_sweep_interval() -> u64 {
    600
}

fn default_connect_timeout() -> u64 {
    5_000
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_metrics_address() -> String {
    "127.0.0.1:9090".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            listen_address: default_listen_address(),
            workers: Vec::new(),
            path_prefix: default_path_prefix(),
            enable_cache: default_true(),
            cache_ttl: default_cache_ttl(),
            client_max_age: default_client_max_age(),
            l1_cache_size_bytes: default_l1_cache_size(),
            max_cacheable_bytes: default_max_cacheable(),
            enable_l2_cache: false,
            l2_cache_dir: default_l2_cache_dir(),
            l2_max_size_bytes: default_l2_max_size(),
            l2_sweep_interval_secs: default_l2_sweep_interval(),
            connect_timeout_ms: default_connect_timeout(),
            request_timeout_ms: default_request_timeout(),
            metrics_endpoint: None,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the YAML configuration file
    ///
    /// # Returns
    /// * `Ok(GatewayConfig)` if loading and validation succeed
    /// * `Err(GatewayError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            GatewayError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: GatewayConfig = serde_yaml::from_str(content).map_err(|e| {
            GatewayError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Create a configuration for the given worker pool with every other value defaulted
    pub fn with_workers<I, S>(workers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        GatewayConfig {
            workers: workers.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - workers must be non-empty and every entry an http(s) URL
    /// - path_prefix must be empty or start with '/'
    /// - cache_ttl must be > 0 when caching is enabled
    /// - max_cacheable_bytes must fit in the L1 cache
    /// - with L2 enabled, max_cacheable_bytes must fit in the L2 limit and the
    ///   sweep interval must be > 0
    /// - timeouts must be > 0
    /// - listen and metrics addresses must parse as socket addresses
    pub fn validate(&self) -> Result<()> {
        if self.workers.is_empty() {
            return Err(GatewayError::ConfigError(
                "workers must contain at least one origin worker".to_string(),
            ));
        }

        for worker in &self.workers {
            let url = reqwest::Url::parse(worker).map_err(|e| {
                GatewayError::ConfigError(format!("Invalid worker URL '{}': {}", worker, e))
            })?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(GatewayError::ConfigError(format!(
                    "Worker URL '{}' must use http or https",
                    worker
                )));
            }
        }

        if !self.path_prefix.is_empty() && !self.path_prefix.starts_with('/') {
            return Err(GatewayError::ConfigError(format!(
                "path_prefix must start with '/', got '{}'",
                self.path_prefix
            )));
        }

        if self.enable_cache && self.cache_ttl == 0 {
            return Err(GatewayError::ConfigError(
                "cache_ttl must be greater than 0 when caching is enabled".to_string(),
            ));
        }

        if self.enable_cache && self.max_cacheable_bytes > self.l1_cache_size_bytes {
            return Err(GatewayError::ConfigError(format!(
                "max_cacheable_bytes ({}) must not exceed l1_cache_size_bytes ({})",
                self.max_cacheable_bytes, self.l1_cache_size_bytes
            )));
        }

        if self.enable_cache && self.enable_l2_cache {
            if self.max_cacheable_bytes as u64 > self.l2_max_size_bytes {
                return Err(GatewayError::ConfigError(format!(
                    "max_cacheable_bytes ({}) must not exceed l2_max_size_bytes ({})",
                    self.max_cacheable_bytes, self.l2_max_size_bytes
                )));
            }
            if self.l2_sweep_interval_secs == 0 {
                return Err(GatewayError::ConfigError(
                    "l2_sweep_interval_secs must be greater than 0".to_string(),
                ));
            }
        }

        if self.connect_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(GatewayError::ConfigError(
                "connect_timeout_ms and request_timeout_ms must be greater than 0".to_string(),
            ));
        }

        self.listen_address
            .parse::<std::net::SocketAddr>()
            .map_err(|e| {
                GatewayError::ConfigError(format!(
                    "Invalid listen_address '{}': {}",
                    self.listen_address, e
                ))
            })?;

        if let Some(ref metrics) = self.metrics_endpoint {
            if metrics.enabled {
                metrics.address.parse::<std::net::SocketAddr>().map_err(|e| {
                    GatewayError::ConfigError(format!(
                        "Invalid metrics_endpoint address '{}': {}",
                        metrics.address, e
                    ))
                })?;
            }
        }

        Ok(())
    }

    /// Edge cache freshness horizon
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }

    /// Interval between L2 directory sweeps
    pub fn l2_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.l2_sweep_interval_secs)
    }

    /// Upstream connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Upstream response-header and read timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
