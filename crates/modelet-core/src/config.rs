//! Configuration types for modelet

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// API server configuration
    pub api: ApiConfig,
    /// Inference server configuration
    pub runtime: RuntimeConfig,
    /// Memory budget configuration
    pub memory: MemoryConfig,
    /// Storage configuration
    pub storage: StorageConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AgentConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::ModeletError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::ModeletError::Config(format!("Failed to read config file: {}", e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, crate::ModeletError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| crate::ModeletError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the agent cannot run with
    pub fn validate(&self) -> Result<(), crate::ModeletError> {
        if self.memory.total_bytes == 0 {
            return Err(crate::ModeletError::Config(
                "memory.total_bytes must be greater than zero".to_string(),
            ));
        }
        if self.memory.total_bytes > i64::MAX as u64 {
            return Err(crate::ModeletError::Config(
                "memory.total_bytes is too large".to_string(),
            ));
        }
        Ok(())
    }
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to bind the REST API server
    pub address: String,
    /// Port for the REST API server
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 9095,
        }
    }
}

/// Inference server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Host of the inference server
    pub host: String,
    /// HTTP port of the inference server
    pub http_port: u16,
    /// Timeout for a single load/unload call in seconds
    pub request_timeout_secs: u64,
    /// How long to wait for the server to become live on startup
    pub startup_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            http_port: 8080,
            request_timeout_secs: 300,
            startup_timeout_secs: 120,
        }
    }
}

/// Memory budget configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Memory available for resident models in bytes
    pub total_bytes: u64,
    /// Percentage of the budget the scheduler may over-commit
    pub overcommit_percentage: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            total_bytes: 8 * 1024 * 1024 * 1024, // 8 GB
            overcommit_percentage: 10,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory the inference server loads models from
    pub models_path: PathBuf,
    /// Interval between sweeps of unused per-model locks
    pub lock_sweep_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            models_path: PathBuf::from("/mnt/agent/models"),
            lock_sweep_interval_secs: 600,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive
    pub level: String,
    /// Log format (compact or full)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "full".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_agent_config() {
        let config = AgentConfig::default();
        assert_eq!(config.api.port, 9095);
        assert_eq!(config.runtime.http_port, 8080);
        assert_eq!(config.memory.overcommit_percentage, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_agent_config_parse() {
        let toml_str = r#"
[memory]
total_bytes = 1000
overcommit_percentage = 0

[runtime]
host = "mlserver"
http_port = 9000

[logging]
level = "modelet_state=debug,info"
"#;
        let config = AgentConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.memory.total_bytes, 1000);
        assert_eq!(config.runtime.host, "mlserver");
        assert_eq!(config.runtime.request_timeout_secs, 300);
        assert_eq!(config.api.port, 9095);
        assert_eq!(config.logging.level, "modelet_state=debug,info");
    }

    #[test]
    fn test_zero_budget_rejected() {
        let result = AgentConfig::from_toml("[memory]\ntotal_bytes = 0\n");
        assert!(matches!(result, Err(crate::ModeletError::Config(_))));
    }
}
