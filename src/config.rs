//! Configuration loaded from `~/.agro-insight/config.json`.
//!
//! Every field has a serde default, so a missing file or a partial file
//! both load. The completion key may also come from the environment.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::assistant::CompletionConfig;
use crate::weather::{ForecastConfig, WeatherSyncConfig};

/// Environment variable consulted when the file carries no completion key.
pub const API_KEY_ENV: &str = "AGRO_COMPLETION_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgroConfig {
    /// Overrides the default `~/.agro-insight/agro.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub weather_sync: WeatherSyncConfig,
}

impl AgroConfig {
    /// Database location: the configured path or the store default.
    pub fn resolve_database_path(&self) -> Result<PathBuf, String> {
        match self.database_path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => Ok(expand_home(path)),
            _ => crate::db::FarmDb::default_path().map_err(|e| e.to_string()),
        }
    }

    /// Fill a missing completion key from `value` (normally the environment).
    fn apply_api_key_fallback(&mut self, value: Option<String>) {
        let has_key = self
            .completion
            .api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty());
        if !has_key {
            self.completion.api_key = value.filter(|k| !k.trim().is_empty());
        }
    }
}

pub fn config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".agro-insight").join("config.json"))
}

/// Load the configuration from the default path.
pub fn load_config() -> Result<AgroConfig, String> {
    load_config_from(&config_path()?)
}

/// Load the configuration from `path`. A missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<AgroConfig, String> {
    let mut config = if path.exists() {
        let content =
            fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;
        serde_json::from_str::<AgroConfig>(&content)
            .map_err(|e| format!("Failed to parse config {}: {}", path.display(), e))?
    } else {
        log::debug!("No config at {}, using defaults", path.display());
        AgroConfig::default()
    };

    config.apply_api_key_fallback(std::env::var(API_KEY_ENV).ok());
    Ok(config)
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.weather_sync.ttl_hours, 24);
        assert!(!config.weather_sync.single_flight);
        assert!(config.forecast.enabled);
        assert_eq!(config.completion.model, "gpt-4o-mini");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "databasePath": "/tmp/farm.db",
                "forecast": { "baseUrl": "http://forecast.local/api" },
                "weatherSync": { "singleFlight": true }
            }"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.forecast.base_url, "http://forecast.local/api");
        assert_eq!(config.forecast.timeout_secs, 15);
        assert!(config.weather_sync.single_flight);
        assert_eq!(config.weather_sync.ttl_hours, 24);
        assert_eq!(config.resolve_database_path().unwrap(), PathBuf::from("/tmp/farm.db"));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(load_config_from(&path).unwrap_err().contains("Failed to parse config"));
    }

    #[test]
    fn test_api_key_fallback_only_fills_blank_keys() {
        let mut config = AgroConfig::default();
        config.apply_api_key_fallback(Some("sk-env".into()));
        assert_eq!(config.completion.api_key.as_deref(), Some("sk-env"));

        config.apply_api_key_fallback(Some("sk-other".into()));
        assert_eq!(config.completion.api_key.as_deref(), Some("sk-env"));

        let mut blank = AgroConfig::default();
        blank.completion.api_key = Some("  ".into());
        blank.apply_api_key_fallback(None);
        assert!(blank.completion.api_key.is_none());
    }
}
