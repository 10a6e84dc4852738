// SPDX-License-Identifier: GPL-3.0-only

//! User configuration
//!
//! Persisted as `settings.toml` under the platform config directory.
//! Missing or malformed files fall back to defaults; CLI flags override
//! whatever is loaded.

use crate::constants::scan;
use crate::errors::AppResult;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "settings.toml";
const APP_NAME: &str = "quickscan";

fn default_api_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_sample_rate() -> u32 {
    scan::DEFAULT_SAMPLE_RATE_HZ
}

fn default_mirror() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the catalog service
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Last used camera device path
    #[serde(default)]
    pub last_camera_path: Option<String>,
    /// Decode sampling rate in attempts per second
    #[serde(default = "default_sample_rate")]
    pub sample_rate_hz: u32,
    /// Mirror the preview horizontally (selfie-style webcams)
    #[serde(default = "default_mirror")]
    pub mirror_preview: bool,
    /// Remembered signed-in user id
    #[serde(default)]
    pub user_id: Option<u32>,
    /// Remembered signed-in username
    #[serde(default)]
    pub username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            last_camera_path: None,
            sample_rate_hz: default_sample_rate(),
            mirror_preview: default_mirror(),
            user_id: None,
            username: None,
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut path| {
        path.push(APP_NAME);
        path.push(CONFIG_FILE);
        path
    })
}

/// Load the configuration, falling back to defaults when absent
pub fn load() -> AppResult<Config> {
    if let Some(path) = default_config_path() {
        if path.exists() {
            return load_from_path(&path);
        }
    }
    Ok(Config::default())
}

/// Persist the configuration to the default location
pub fn save(config: &Config) -> AppResult<()> {
    if let Some(path) = default_config_path() {
        return save_to_path(config, &path);
    }
    Ok(())
}

pub fn load_from_path(path: &Path) -> AppResult<Config> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content).unwrap_or_default())
}

pub fn save_to_path(config: &Config, path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| crate::errors::AppError::Config(e.to_string()))?;
    fs::write(path, content)?;
    Ok(())
}
