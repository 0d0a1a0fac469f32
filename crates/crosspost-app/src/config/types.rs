//! Configuration types for crosspost
//!
//! `Settings` mirrors `config.toml`; every field has a serde default so a
//! partial file is always valid.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Application settings (`<config_dir>/crosspost/config.toml`)
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub host: HostSettings,

    #[serde(default)]
    pub detection: DetectionSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub platforms: PlatformSettings,
}

/// Browser connection
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HostSettings {
    /// `http://host:port` DevTools base or a `ws://` browser endpoint
    #[serde(default = "default_devtools_url")]
    pub devtools_url: String,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            devtools_url: default_devtools_url(),
        }
    }
}

fn default_devtools_url() -> String {
    "http://127.0.0.1:9222".to_string()
}

/// Detection chain tuning
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DetectionSettings {
    /// Bound on each authenticated API call or page scrape
    #[serde(default = "default_api_timeout_ms")]
    pub api_timeout_ms: u64,

    /// Bound on script evaluation in an open surface
    #[serde(default = "default_surface_timeout_ms")]
    pub surface_timeout_ms: u64,

    /// Replace avatar URLs with inline `data:` URLs
    #[serde(default)]
    pub inline_avatars: bool,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            api_timeout_ms: default_api_timeout_ms(),
            surface_timeout_ms: default_surface_timeout_ms(),
            inline_avatars: false,
        }
    }
}

impl DetectionSettings {
    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(self.api_timeout_ms)
    }

    pub fn surface_timeout(&self) -> Duration {
        Duration::from_millis(self.surface_timeout_ms)
    }
}

fn default_api_timeout_ms() -> u64 {
    8_000
}

fn default_surface_timeout_ms() -> u64 {
    5_000
}

/// Result cache location and default TTL
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheSettings {
    /// Cache file; defaults to `<data_local_dir>/crosspost/cache.json`
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// TTL for platforms that do not declare one
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            path: None,
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    3_600
}

/// Sync pipeline timing
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SyncSettings {
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Pause after readiness so late editor initialisation finishes
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Hard bound on one platform's whole pipeline
    #[serde(default = "default_platform_budget_ms")]
    pub platform_budget_ms: u64,

    /// Platforms synced at the same time
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            ready_timeout_ms: default_ready_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            settle_ms: default_settle_ms(),
            platform_budget_ms: default_platform_budget_ms(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl SyncSettings {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn platform_budget(&self) -> Duration {
        Duration::from_millis(self.platform_budget_ms)
    }
}

fn default_ready_timeout_ms() -> u64 {
    12_000
}

fn default_poll_interval_ms() -> u64 {
    300
}

fn default_settle_ms() -> u64 {
    1_500
}

fn default_platform_budget_ms() -> u64 {
    60_000
}

fn default_max_concurrent() -> usize {
    1
}

/// Per-platform switches
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PlatformSettings {
    /// Platform ids hidden from listing, detection and sync
    #[serde(default)]
    pub disabled: Vec<String>,

    /// Cache TTL overrides in seconds, keyed by platform id
    #[serde(default)]
    pub ttl_overrides: HashMap<String, u64>,
}
