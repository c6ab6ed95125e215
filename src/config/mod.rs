/// Configuration management for charla

use crate::core::history::DEFAULT_HISTORY_CAPACITY;
use crate::core::{BackendDescriptor, QuotaConfig};
pub use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main charla configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Registry store configuration (registry role)
    pub store: StoreConfig,
    /// Registry client configuration (every role)
    pub registry: RegistryConfig,
    /// Gateway configuration (gateway role)
    pub gateway: GatewayConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub listen_addr: String,
    /// Expose `GET /shutdown`
    pub shutdown_endpoint: bool,
}

/// Registry store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How long a registration stays visible after its last heartbeat
    pub lifetime_sec: u64,
}

/// Registry client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Base url of the registry, e.g. `http://10.0.0.1:8000`
    pub url: Option<String>,
    /// Timeout of a single registry call in seconds
    pub timeout_sec: u64,
    /// Discovery period in seconds
    pub update_period_sec: u64,
    /// Heartbeat period in seconds
    pub register_period_sec: u64,
    /// Backend names to discover
    pub services_names: Vec<String>,
    /// Descriptor this process publishes; `{ip}` in its url is replaced by
    /// the local outbound address
    pub conf: Option<BackendDescriptor>,
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Conversation history entries kept per user
    pub history_capacity: usize,
    /// Initial admission quotas
    pub quotas: QuotaConfig,
    /// Backends known before the first discovery round
    pub services: Vec<BackendDescriptor>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            shutdown_endpoint: false,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lifetime_sec: crate::registry::DEFAULT_LIFETIME.as_secs(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_sec: 5,
            update_period_sec: 180,
            register_period_sec: 60,
            services_names: Vec::new(),
            conf: None,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            quotas: QuotaConfig::default(),
            services: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl RegistryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }

    /// Whether this process talks to a registry at all
    pub fn is_enabled(&self) -> bool {
        self.url.is_some() && (self.conf.is_some() || !self.services_names.is_empty())
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate server config
        self.server
            .listen_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|_| {
                ConfigError::ValidationError(format!(
                    "Invalid listen_addr: {}",
                    self.server.listen_addr
                ))
            })?;

        // Validate store config
        if self.store.lifetime_sec == 0 {
            return Err(ConfigError::ValidationError(
                "store lifetime_sec must be greater than 0".to_string(),
            ));
        }

        // Validate registry client config
        let registry = &self.registry;
        if registry.timeout_sec == 0 {
            return Err(ConfigError::ValidationError(
                "registry timeout_sec must be greater than 0".to_string(),
            ));
        }

        if registry.update_period_sec == 0 || registry.register_period_sec == 0 {
            return Err(ConfigError::ValidationError(
                "registry update_period_sec and register_period_sec must be greater than 0"
                    .to_string(),
            ));
        }

        if registry.url.is_none() && (registry.conf.is_some() || !registry.services_names.is_empty()) {
            return Err(ConfigError::ValidationError(
                "registry url is required when conf or services_names is set".to_string(),
            ));
        }

        if let Some(url) = &registry.url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid registry url: {}",
                    url
                )));
            }
        }

        let published = registry.conf.iter();
        for service in published.chain(self.gateway.services.iter()) {
            if service.name.trim().is_empty() || service.url.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "service name and url cannot be empty: {:?}",
                    service
                )));
            }
            if service.timeout.is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "service {} timeout must be greater than 0",
                    service.name
                )));
            }
        }

        // Validate gateway config
        if self.gateway.history_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "gateway history_capacity must be greater than 0".to_string(),
            ));
        }

        // Validate logging config
        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}",
                    self.logging.format
                )))
            }
        }

        Ok(())
    }

    /// Example configuration for a role
    pub fn example(role: &str) -> Result<Self, ConfigError> {
        let registry_url = Some("http://10.0.1.10:8000".to_string());

        let config = match role {
            "registry" => Config {
                server: ServerConfig {
                    listen_addr: "0.0.0.0:8000".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
            "gateway" => Config {
                registry: RegistryConfig {
                    url: registry_url,
                    services_names: vec![
                        "gen".to_string(),
                        "wiki".to_string(),
                        "canned".to_string(),
                    ],
                    conf: Some(BackendDescriptor::new("aggregator", "http://{ip}:8080/api")),
                    ..Default::default()
                },
                gateway: GatewayConfig {
                    quotas: QuotaConfig {
                        max_in_flight: 100,
                        max_in_flight_for_uid: 2,
                    },
                    ..Default::default()
                },
                ..Default::default()
            },
            "canned" => Config {
                server: ServerConfig {
                    listen_addr: "0.0.0.0:8090".to_string(),
                    ..Default::default()
                },
                registry: RegistryConfig {
                    url: registry_url,
                    conf: Some(
                        BackendDescriptor::new("canned", "http://{ip}:8090/api")
                            .with_timeout(Duration::from_secs(1))
                            .with_priority(0),
                    ),
                    ..Default::default()
                },
                ..Default::default()
            },
            _ => {
                return Err(ConfigError::ValidationError(
                    "Role must be 'gateway', 'registry' or 'canned'".to_string(),
                ))
            }
        };

        Ok(config)
    }

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P, role: &str) -> Result<(), ConfigError> {
        Self::example(role)?.save_to_file(path)
    }
}
