use std::path::PathBuf;

use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::Value;

/// Every config section knows how to build itself from its TOML table,
/// falling back to defaults when the section is absent.
pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> Self {
        match section {
            Some(value) => value.clone().try_into().expect("cannot deserialize config"),
            None => {
                warn!("config section not found");
                Self::default()
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub image: Option<PathBuf>,
    pub timeout: u64,
    /// Cycles without any issue or retirement before the run is declared
    /// deadlocked.
    pub stall_limit: u64,
    pub log_stats: bool,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            image: None,
            timeout: 10_000_000,
            stall_limit: 10_000,
            log_stats: true,
        }
    }
}
