//! Dynapool Configuration System
//!
//! TOML-based configuration of the host application and its worker pools,
//! with environment variable overrides.

use dp_common::{OverflowPolicyKind, WorkerPoolConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

mod loader;

pub use loader::ConfigLoader;

/// Name used when the host application does not configure one.
pub const DEFAULT_APP_NAME: &str = "default";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Identity of the host application; remote commands for other names are ignored
    pub app_name: String,
    pub report: ReportConfig,
    pub pools: Vec<PoolDefinition>,
}

/// Periodic snapshot reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 20,
        }
    }
}

/// Startup definition of one worker pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolDefinition {
    pub name: String,
    pub core_size: usize,
    pub max_size: usize,
    pub queue_capacity: usize,
    pub keep_alive_secs: u64,
    /// abort, discard, discard_oldest or caller_runs
    pub policy: String,
}

impl Default for PoolDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            core_size: 20,
            max_size: 50,
            queue_capacity: 5000,
            keep_alive_secs: 60,
            policy: "abort".to_string(),
        }
    }
}

impl PoolDefinition {
    /// Parsed overflow policy; unknown names fall back to abort.
    pub fn overflow_policy(&self) -> OverflowPolicyKind {
        match self.policy.parse() {
            Ok(kind) => kind,
            Err(e) => {
                warn!(pool = %self.name, error = %e, "Falling back to abort policy");
                OverflowPolicyKind::Abort
            }
        }
    }

    pub fn to_pool_config(&self, app_name: &str) -> WorkerPoolConfig {
        WorkerPoolConfig {
            app_name: app_name.to_string(),
            pool_name: self.name.clone(),
            core_size: self.core_size,
            max_size: self.max_size,
            queue_capacity: self.queue_capacity,
            keep_alive_secs: self.keep_alive_secs,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Application name, falling back to [`DEFAULT_APP_NAME`] when blank.
    pub fn effective_app_name(&self) -> &str {
        let name = self.app_name.trim();
        if name.is_empty() {
            DEFAULT_APP_NAME
        } else {
            name
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.report.enabled && self.report.interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "report.interval_secs must be positive".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for pool in &self.pools {
            if pool.name.trim().is_empty() {
                return Err(ConfigError::ValidationError("pool name must not be empty".to_string()));
            }
            if !seen.insert(pool.name.as_str()) {
                return Err(ConfigError::ValidationError(format!("duplicate pool name: {}", pool.name)));
            }
            pool.to_pool_config(self.effective_app_name())
                .validate()
                .map_err(ConfigError::ValidationError)?;
        }
        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Dynapool Configuration
# Environment variables override these settings

app_name = "order-service"

[report]
enabled = true
interval_secs = 20

[[pools]]
name = "io-pool"
core_size = 20
max_size = 50
queue_capacity = 5000
keep_alive_secs = 60
policy = "abort"  # abort, discard, discard_oldest, caller_runs

[[pools]]
name = "batch-pool"
core_size = 2
max_size = 4
queue_capacity = 10
policy = "caller_runs"
"#
        .to_string()
    }
}
