//! # Configuration Loader
//!
//! Reads the optional `config.toml` into [`AppConfig`]. Key mapping and
//! defaults live in `AppConfig::from_toml`; this module only locates, reads
//! and parses the file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use lp_core::config::AppConfig;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "LP_CONFIG";

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// `$LP_CONFIG` when set and non-empty, otherwise `config.toml` under `data_root`.
pub fn resolve_config_path(data_root: &Path) -> PathBuf {
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => data_root.join(DEFAULT_CONFIG_FILE),
    }
}

/// Load configuration from a TOML file.
///
/// # Errors
///
/// Returns error if the file cannot be read, is not valid TOML, or carries an
/// out-of-range value.
pub fn load_config(config_path: &Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
    let toml_value: toml::Value =
        toml::from_str(&content).context("Failed to parse config as TOML")?;
    AppConfig::from_toml(&toml_value)
        .with_context(|| format!("Invalid config file: {}", config_path.display()))
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_config_or_default(config_path: &Path) -> anyhow::Result<AppConfig> {
    if !config_path.exists() {
        return Ok(AppConfig::default());
    }
    load_config(config_path)
}
