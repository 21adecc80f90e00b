use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

// Format definitions for the config file.
#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    pub dispatcher: DispatcherConfig,
    pub groups: Vec<GroupConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Capacity of each group's task queue. Tasks arriving beyond this are
    /// dropped and counted, never queued.
    pub queue_max_size: usize,
}

/// One worker group: its partition key and the number of workers a freshly
/// staged reload generation is expected to bring up for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub id: String,
    pub count: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

pub fn read_config(config_path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let config_str = fs::read_to_string(config_path)?;
    Ok(toml::from_str(&config_str)?)
}
