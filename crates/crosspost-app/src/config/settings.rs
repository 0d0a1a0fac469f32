//! Settings loading and first-run initialisation

use std::path::{Path, PathBuf};

use crosspost_core::prelude::*;

use super::types::Settings;

const CONFIG_DIR: &str = "crosspost";
const CONFIG_FILENAME: &str = "config.toml";

/// Environment variable overriding the config file location
pub const CONFIG_ENV_VAR: &str = "CROSSPOST_CONFIG";

/// Resolve the config file path
///
/// `CROSSPOST_CONFIG` wins; otherwise `<config_dir>/crosspost/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILENAME))
}

/// Load settings from the default location
pub fn load_default_settings() -> Settings {
    match config_path() {
        Some(path) => load_settings(&path),
        None => {
            debug!("No config directory available, using defaults");
            Settings::default()
        }
    }
}

/// Load settings from `config_path`
///
/// A missing, unreadable or malformed file falls back to defaults.
pub fn load_settings(config_path: &Path) -> Settings {
    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Write a commented default config to `config_path` unless one exists
///
/// Returns `true` when a new file was written.
pub fn init_config(config_path: &Path) -> Result<bool> {
    if config_path.exists() {
        return Ok(false);
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::config(format!("Failed to create {:?}: {}", parent, e)))?;
    }

    let temp_path = config_path.with_extension("toml.tmp");
    std::fs::write(&temp_path, DEFAULT_CONFIG)
        .map_err(|e| Error::config(format!("Failed to write config: {}", e)))?;
    std::fs::rename(&temp_path, config_path)
        .map_err(|e| Error::config(format!("Failed to write config: {}", e)))?;

    info!("Created default config at {:?}", config_path);
    Ok(true)
}

const DEFAULT_CONFIG: &str = r#"# crosspost configuration

[host]
devtools_url = "http://127.0.0.1:9222"   # DevTools HTTP base or ws:// endpoint

[detection]
api_timeout_ms = 8000        # Per API call / page scrape
surface_timeout_ms = 5000    # Per in-page probe
inline_avatars = false       # Embed avatars as data: URLs

[cache]
# path = "/custom/cache.json"
default_ttl_secs = 3600      # Clamped to 1h..7d

[sync]
ready_timeout_ms = 12000
poll_interval_ms = 300
settle_ms = 1500
platform_budget_ms = 60000
max_concurrent = 1

[platforms]
disabled = []
# ttl_overrides = { xiaohongshu = 604800 }
"#;
