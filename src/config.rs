/// Client configuration for faro

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Cluster membership and dialing
    pub cluster: ClusterSettings,
    /// Database selection
    pub database: DatabaseSettings,
    /// Connection pool sizing
    pub pool: PoolSettings,
    /// Leader lookup retry behavior
    pub retry: RetrySettings,
}

/// Cluster membership and dialing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    /// Known cluster node addresses (host:port)
    pub nodes: Vec<String>,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
}

/// Database selection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database name to open on each connection
    pub name: String,
}

/// Connection pool sizing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Connections opened eagerly by initialize
    pub min_size: usize,
    /// Hard upper bound on open connections
    pub max_size: usize,
}

/// Leader lookup retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts before giving up
    pub max_attempts: u32,
    /// First backoff delay in milliseconds
    pub base_delay_ms: u64,
    /// Backoff delay cap in milliseconds
    pub max_delay_ms: u64,
    /// Jitter fraction applied to each delay (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterSettings {
                nodes: vec!["127.0.0.1:9001".to_string()],
                connect_timeout_ms: 15_000,
            },
            database: DatabaseSettings {
                name: "main".to_string(),
            },
            pool: PoolSettings {
                min_size: 1,
                max_size: 10,
            },
            retry: RetrySettings {
                max_attempts: 5,
                base_delay_ms: 100,
                max_delay_ms: 10_000,
                jitter: 0.1,
            },
        }
    }
}

impl ClientConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: ClientConfig =
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
        if self.cluster.nodes.is_empty() {
            return Err(ConfigError::ValidationError(
                "cluster nodes cannot be empty".to_string(),
            ));
        }

        for node in &self.cluster.nodes {
            node.parse::<std::net::SocketAddr>().map_err(|_| {
                ConfigError::ValidationError(format!("Invalid node address: {}", node))
            })?;
        }

        if self.cluster.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.database.name.is_empty() {
            return Err(ConfigError::ValidationError(
                "database name cannot be empty".to_string(),
            ));
        }

        if self.pool.max_size == 0 {
            return Err(ConfigError::ValidationError(
                "pool max_size must be greater than 0".to_string(),
            ));
        }

        if self.pool.min_size > self.pool.max_size {
            return Err(ConfigError::ValidationError(
                "pool min_size cannot exceed max_size".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry max_attempts must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::ValidationError(format!(
                "retry jitter must be between 0.0 and 1.0, got {}",
                self.retry.jitter
            )));
        }

        Ok(())
    }
}

impl RetrySettings {
    /// Build the retry policy these settings describe
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts)
            .with_base_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_jitter(self.jitter)
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
