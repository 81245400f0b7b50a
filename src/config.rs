use std::path::Path;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::crawler::CapabilityTable;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub importer: ImporterConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Crawl non-leaf subtrees on a thread pool.
    pub parallel: bool,
    pub threads: usize,
    /// `type/id` keys that are neither written nor descended into.
    pub excluded_resources: Vec<String>,
    pub capabilities: CapabilityTable,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            threads: 4,
            excluded_resources: vec![],
            capabilities: CapabilityTable::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImporterConfig {
    /// Refresh the model watchdog every this many imported records.
    pub watchdog_interval: usize,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            watchdog_interval: 100,
        }
    }
}

impl Config {
    pub fn from_toml_str(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| anyhow!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content).map_err(|err| {
            anyhow!(
                "Failed to parse TOML config in file {} due to error: {}",
                path.display(),
                err
            )
        })
    }
}
