use crate::error::{Result, TrailError};
use crate::matching::{MatchParams, SpeedBounds};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the shared-log passphrase
pub const PASSPHRASE_ENV: &str = "TRAIL_FOLLOW_PASSPHRASE";

/// Participant toggles and speed limits
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Merge fixes found in the shared log
    pub import_shared_points: bool,
    /// Let a shared `start` parameter overwrite the local start time
    pub import_shared_start: bool,
    /// Publish new fixes to the shared log
    pub share_new_points: bool,
    pub min_speed: f64, // km/h
    pub max_speed: f64, // km/h
}

impl Default for Preferences {
    fn default() -> Self {
        Preferences {
            import_shared_points: false,
            import_shared_start: false,
            share_new_points: false,
            min_speed: 2.0,
            max_speed: 20.0,
        }
    }
}

impl Preferences {
    pub fn speed_bounds(&self) -> SpeedBounds {
        SpeedBounds {
            min_kmh: self.min_speed,
            max_kmh: self.max_speed,
        }
    }
}

/// Where and how the shared log is stored
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub passphrase: String,
    pub endpoint: String,
    /// URL prefix of a CORS relay wrapping every request
    pub cors_relay: Option<String>,
    pub document_prefix: String,
    pub document_suffix: String,
    /// Base of contribution links; also the first entry of the import allow-list
    pub base_url: String,
    pub extra_origins: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            passphrase: String::new(),
            endpoint: "https://www.protectedtext.com/".to_string(),
            cors_relay: None,
            document_prefix: "cap_nn___gpx/".to_string(),
            document_suffix: ".gpx".to_string(),
            base_url: "http://localhost:7777/".to_string(),
            extra_origins: Vec::new(),
            timeout_secs: 30,
        }
    }
}

impl SyncSettings {
    /// Prefixes a shared-log line must start with to be imported
    pub fn allowed_origins(&self) -> Vec<&str> {
        std::iter::once(self.base_url.as_str())
            .chain(self.extra_origins.iter().map(String::as_str))
            .collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub preferences: Preferences,
    pub matching: MatchParams,
    pub sync: SyncSettings,
    /// Directory holding `<track>.gpx` files
    pub track_dir: PathBuf,
}

impl Config {
    /// Load from a JSON file (missing file = defaults), then apply the
    /// environment override
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(p)
                    .map_err(|e| TrailError::Storage(format!("{}: {}", p.display(), e)))?;
                Self::from_json(&text)?
            }
            Some(p) => {
                log::info!("Config {} not found, using defaults", p.display());
                Config::default()
            }
            None => Config::default(),
        };

        if let Ok(passphrase) = std::env::var(PASSPHRASE_ENV) {
            config.sync.passphrase = passphrase;
        }
        if config.track_dir.as_os_str().is_empty() {
            config.track_dir = PathBuf::from("gpx");
        }
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(text).map_err(|e| TrailError::validation(format!("config: {}", e)))?;
        config.matching.validate()?;
        Ok(config)
    }

    /// Path of the reference trace for a track identifier
    pub fn track_path(&self, track: &str) -> PathBuf {
        self.track_dir.join(format!("{}.gpx", track))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = Config::from_json(
            r#"{"preferences": {"max_speed": 15.0, "share_new_points": true},
                "sync": {"cors_relay": "https://relay.example/"}}"#,
        )
        .unwrap();

        assert_eq!(config.preferences.max_speed, 15.0);
        assert_eq!(config.preferences.min_speed, 2.0);
        assert!(config.preferences.share_new_points);
        assert!(!config.preferences.import_shared_points);
        assert_eq!(config.sync.cors_relay.as_deref(), Some("https://relay.example/"));
        assert_eq!(config.sync.document_suffix, ".gpx");
        assert_eq!(config.matching, MatchParams::default());
    }

    #[test]
    fn test_bad_json_is_validation_error() {
        assert!(matches!(
            Config::from_json("{\"preferences\": 3}"),
            Err(TrailError::Validation(_))
        ));
    }

    #[test]
    fn test_zero_noise_floor_rejected() {
        assert!(matches!(
            Config::from_json(r#"{"matching": {"noise_floor_m": 0.0}}"#),
            Err(TrailError::Validation(_))
        ));
        let config = Config::from_json(r#"{"matching": {"noise_floor_m": 12.5}}"#).unwrap();
        assert_eq!(config.matching.noise_floor_m, 12.5);
    }

    #[test]
    fn test_allowed_origins() {
        let mut sync = SyncSettings::default();
        sync.extra_origins.push("https://mirror.example/follow/".to_string());
        assert_eq!(
            sync.allowed_origins(),
            vec!["http://localhost:7777/", "https://mirror.example/follow/"]
        );
    }

    #[test]
    fn test_track_path() {
        let config = Config {
            track_dir: PathBuf::from("courses"),
            ..Config::default()
        };
        assert_eq!(config.track_path("25eb"), PathBuf::from("courses/25eb.gpx"));
    }
}
