use anyhow::{Context, Result};
use std::path::PathBuf;

use super::config::Config;

pub fn default_data_dir() -> Result<PathBuf> {
    Ok(dirs::data_dir()
        .context("unable to determine user data directory")?
        .join("easyoffice"))
}

/// Data directory resolution: command-line flag, then config file, then
/// the platform default.
pub fn resolve_data_dir(flag: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir);
    }
    if let Some(dir) = Config::load()?.data_dir {
        return Ok(dir);
    }
    default_data_dir()
}
