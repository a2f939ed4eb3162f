use canopy_sync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_CONFIG_NAME: &str = "canopy.config.json";

/// Canopy configuration file format
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Client store and channel tuning
    #[serde(default)]
    pub sync: SyncConfig,

    /// Defaults for `canopy simulate`
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationConfig {
    #[serde(default = "default_clients")]
    pub clients: usize,

    #[serde(default = "default_ops_per_client")]
    pub ops_per_client: usize,

    #[serde(default = "default_seed")]
    pub seed: u64,

    /// How long to wait for every client to drain its queue
    #[serde(default = "default_settle_timeout_ms")]
    pub settle_timeout_ms: u64,
}

fn default_clients() -> usize {
    3
}

fn default_ops_per_client() -> usize {
    50
}

fn default_seed() -> u64 {
    42
}

fn default_settle_timeout_ms() -> u64 {
    5_000
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            clients: default_clients(),
            ops_per_client: default_ops_per_client(),
            seed: default_seed(),
            settle_timeout_ms: default_settle_timeout_ms(),
        }
    }
}

impl Config {
    /// Load config from a directory
    pub fn load(cwd: &str) -> anyhow::Result<Self> {
        let config_path = Self::path(cwd);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn path(cwd: &str) -> PathBuf {
        PathBuf::from(cwd).join(DEFAULT_CONFIG_NAME)
    }
}
