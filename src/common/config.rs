use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

/// Optional settings read from `config.toml` in the user config directory.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Overrides where slot files are stored.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = config_file_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("reading config file from {}", path.display()))?;
        let config = toml::from_str(&contents)
            .with_context(|| format!("parsing config file at {}", path.display()))?;

        Ok(config)
    }
}

fn config_file_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("unable to determine user config directory")?
        .join("easyoffice");
    Ok(config_dir.join("config.toml"))
}
