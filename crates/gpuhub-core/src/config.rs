//! Configuration types for gpuhub

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Allocator configuration
    pub allocator: AllocatorConfig,
    /// API server configuration
    pub api: ApiConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl DaemonConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::GpuhubError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::GpuhubError::Config(format!("Failed to read config file: {}", e))
        })?;
        toml::from_str(&content)
            .map_err(|e| crate::GpuhubError::Config(format!("Failed to parse config: {}", e)))
    }
}

/// Allocator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Path to the resource catalog ("hostname #gpus [driver]" per line)
    pub catalog_path: PathBuf,
    /// Path to the JSON allocation table
    pub store_path: PathBuf,
    /// Placement strategy
    pub strategy: StrategyKind,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            catalog_path: PathBuf::from("/etc/gpuhub/resources.txt"),
            store_path: PathBuf::from("/var/lib/gpuhub/allocations.json"),
            strategy: StrategyKind::FirstFit,
        }
    }
}

/// Placement strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// First host (by name) with enough free slots
    #[default]
    FirstFit,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::FirstFit => write!(f, "first-fit"),
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = crate::GpuhubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "first-fit" | "firstfit" => Ok(StrategyKind::FirstFit),
            other => Err(crate::GpuhubError::Config(format!(
                "Unknown placement strategy: {}",
                other
            ))),
        }
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
            port: 9190,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}
