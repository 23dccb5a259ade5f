//! conveyor.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConveyorConfig {
    pub gateway: GatewayConfig,
    pub pagination: PaginationConfig,
    pub state: StateConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub default_timeout: String,
    /// Tags this process advertises to target selectors.
    pub tags: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
            default_timeout: "10m".to_string(),
            tags: Vec::new(),
        }
    }
}

impl GatewayConfig {
    pub fn default_timeout(&self) -> CoreResult<Duration> {
        parse_duration(&self.default_timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub page_size: usize,
    pub max_pages: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            max_pages: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    #[default]
    Memory,
    Redb,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub backend: StateBackend,
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::Memory,
            path: PathBuf::from("/var/lib/conveyor/outputs.redb"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,conveyor=debug".to_string(),
            json: false,
        }
    }
}

impl ConveyorConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&content)?)
    }

    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: ConveyorConfig =
            toml::from_str(content).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// The default configuration, as written by `conveyord scaffold-config`.
    pub fn scaffold() -> Self {
        Self::default()
    }

    fn validate(&self) -> CoreResult<()> {
        if self.gateway.workers == 0 {
            return Err(CoreError::Config("gateway.workers must be at least 1".into()));
        }
        if self.gateway.queue_capacity == 0 {
            return Err(CoreError::Config(
                "gateway.queue_capacity must be at least 1".into(),
            ));
        }
        if self.pagination.page_size == 0 || self.pagination.max_pages == 0 {
            return Err(CoreError::Config(
                "pagination.page_size and pagination.max_pages must be positive".into(),
            ));
        }
        self.gateway.default_timeout()?;
        Ok(())
    }
}
