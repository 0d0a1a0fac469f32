//! Configuration loading and first-run setup

pub mod settings;
pub mod types;

pub use settings::{config_path, init_config, load_default_settings, load_settings, CONFIG_ENV_VAR};
pub use types::{
    CacheSettings, DetectionSettings, HostSettings, PlatformSettings, Settings, SyncSettings,
};
