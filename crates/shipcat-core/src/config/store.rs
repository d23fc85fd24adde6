//! Config store locating and loading shipcat.toml.

use std::path::{Path, PathBuf};

use super::{ShipcatConfig, parser};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_path: PathBuf,
}

impl ConfigStore {
    /// Store at the platform config directory (`~/.config/shipcat/shipcat.toml`).
    pub fn from_default_location() -> anyhow::Result<Self> {
        let global_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
            .join("shipcat");
        Ok(Self::from_path(global_dir.join("shipcat.toml")))
    }

    pub fn from_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the configuration. A missing file is an error: the service has
    /// nothing to deploy without one.
    pub fn load(&self) -> anyhow::Result<ShipcatConfig> {
        if !self.config_path.exists() {
            anyhow::bail!(
                "Config file not found: {}",
                self.config_path.display()
            );
        }
        parser::parse_shipcat_toml(&self.config_path)
    }
}
