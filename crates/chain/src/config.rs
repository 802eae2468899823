//! Chain configuration and genesis state.

use crate::resources::ResourceLimitData;
use crate::{ChainError, Result};
use bytes::Bytes;
use kestrel_types::ObjectSpace;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// One object seeded into state at genesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisObject {
    /// Target space
    pub space: ObjectSpace,
    /// Object key
    pub key: Bytes,
    /// Object value
    pub value: Bytes,
}

/// Genesis state: the authorized producer plus arbitrary seeded objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConfig {
    /// Address whose blocks the chain accepts; its digest is the chain id
    pub producer: Bytes,
    /// Additional objects written into the genesis root
    #[serde(default)]
    pub objects: Vec<GenesisObject>,
}

fn default_module_cache_size() -> usize {
    32
}

/// Top-level chain configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Per-block resource limits and costs
    #[serde(default)]
    pub resource_limits: ResourceLimitData,
    /// Compiled-module cache capacity
    #[serde(default = "default_module_cache_size")]
    pub module_cache_size: usize,
    /// Genesis state
    pub genesis: GenesisConfig,
}

impl ChainConfig {
    /// Creates a configuration with default limits for the given producer.
    pub fn with_producer(producer: impl Into<Bytes>) -> Self {
        Self {
            resource_limits: ResourceLimitData::default(),
            module_cache_size: default_module_cache_size(),
            genesis: GenesisConfig {
                producer: producer.into(),
                objects: Vec::new(),
            },
        }
    }

    /// Loads a configuration from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        info!("loading chain configuration from {}", path.display());
        let content = std::fs::read_to_string(path)
            .map_err(|e| ChainError::Config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&content).map_err(|e| ChainError::Config(e.to_string()))
    }

    /// Saves the configuration to a JSON file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ChainError::Config(e.to_string()))?;
        std::fs::write(path, content)
            .map_err(|e| ChainError::Config(format!("{}: {e}", path.display())))
    }
}
