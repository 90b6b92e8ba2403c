use std::{net::SocketAddr, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Settings read from a TOML file. Command line arguments take precedence.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub url: Option<String>,
    pub listen: Option<SocketAddr>,
    pub cache_dir: Option<PathBuf>,
    /// Connect and read timeout in seconds
    pub timeout: Option<u64>,
    pub user_agent: Option<String>,
    pub headers: Vec<String>,
}

impl Config {
    pub fn load(file: &PathBuf) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(file)?;
        let config = toml::from_str(&data)?;
        Ok(config)
    }
}
