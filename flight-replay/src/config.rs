use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use avionics_common::storage::StorageConfig;
use flight_core::FlightProfile;
use serde::{Deserialize, Serialize};

/// Replay settings, read from a toml file with optional `[profile]` and `[storage]` tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub profile: FlightProfile,
    pub storage: StorageConfig,
}

impl ReplayConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config
            .profile
            .validate()
            .map_err(|e| anyhow!("invalid flight profile: {}", e.0))?;
        Ok(config)
    }
}
