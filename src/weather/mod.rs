//! External forecast integration.
//!
//! `client` talks to the forecast provider, `sync` walks an organization's
//! plots and upserts the forecast days, and `gatekeeper` decides whether a
//! sync is due for an organization.

pub mod client;
pub mod gatekeeper;
pub mod sync;

use serde::{Deserialize, Serialize};

/// Forecast provider configuration stored in ~/.agro-insight/config.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_base_url() -> String {
    "http://localhost:8085/api/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    15
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Freshness policy for the per-organization forecast sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherSyncConfig {
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u32,
    /// Make the transition to `syncing` an atomic compare-and-set so only one
    /// caller per organization runs a sync at a time.
    #[serde(default)]
    pub single_flight: bool,
}

fn default_ttl_hours() -> u32 {
    24
}

impl Default for WeatherSyncConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_ttl_hours(),
            single_flight: false,
        }
    }
}
