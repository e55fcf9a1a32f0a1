//! Rider profile and engine configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Minimum plausible threshold power in watts.
const MIN_FTP_WATTS: u16 = 50;
/// Maximum plausible threshold power in watts.
const MAX_FTP_WATTS: u16 = 600;

/// Rider profile with physiological data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiderProfile {
    /// Unique identifier
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Functional Threshold Power in watts (50-600)
    pub ftp_watts: u16,
    /// Maximum heart rate in bpm
    pub max_hr: Option<u8>,
    /// Weight in kilograms
    pub weight_kg: f32,
    /// Profile creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

impl Default for RiderProfile {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: "Rider".to_string(),
            ftp_watts: 200,
            max_hr: None,
            weight_kg: 75.0,
            created_at: now,
            updated_at: now,
        }
    }
}

impl RiderProfile {
    /// Create a new profile with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Update FTP, rejecting implausible values.
    pub fn set_ftp(&mut self, ftp_watts: u16) -> Result<(), ConfigError> {
        if !Self::validate_ftp(ftp_watts) {
            return Err(ConfigError::InvalidValue(format!(
                "FTP must be between {} and {} watts",
                MIN_FTP_WATTS, MAX_FTP_WATTS
            )));
        }
        self.ftp_watts = ftp_watts;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Check whether an FTP value is plausible.
    pub fn validate_ftp(ftp_watts: u16) -> bool {
        (MIN_FTP_WATTS..=MAX_FTP_WATTS).contains(&ftp_watts)
    }
}

/// Playback-related settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackSettings {
    /// Idle time before autopause, in seconds
    pub autopause_idle_secs: f64,
    /// Generate plausible metrics when no sensor reports
    pub synthetic_metrics: bool,
    /// Resistance level pushed when entering manual mode
    pub default_resistance_pct: u8,
    /// Power readings above this are recorded as absent
    pub power_spike_filter_watts: u16,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            autopause_idle_secs: 5.0,
            synthetic_metrics: true,
            default_resistance_pct: 30,
            power_spike_filter_watts: 2000,
        }
    }
}

/// Sensor-related settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorSettings {
    /// Discovery scan duration in seconds
    pub discovery_timeout_secs: u64,
    /// Connection attempt timeout in seconds
    pub connection_timeout_secs: u64,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            discovery_timeout_secs: 10,
            connection_timeout_secs: 10,
        }
    }
}

/// Top-level engine configuration, persisted as TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Rider profile
    pub profile: RiderProfile,
    /// Playback settings
    pub playback: PlaybackSettings,
    /// Sensor settings
    pub sensors: SensorSettings,
}

impl EngineConfig {
    /// Build the player configuration from profile and playback settings.
    pub fn player_config(&self) -> crate::player::PlayerConfig {
        crate::player::PlayerConfig {
            threshold_watts: self.profile.ftp_watts,
            autopause_idle_secs: self.playback.autopause_idle_secs,
            synthetic_metrics: self.playback.synthetic_metrics,
            default_resistance_pct: self.playback.default_resistance_pct,
            power_spike_filter_watts: self.playback.power_spike_filter_watts,
        }
    }

    /// Build the trainer link configuration.
    pub fn link_config(&self) -> crate::sensors::LinkConfig {
        crate::sensors::LinkConfig {
            discovery_timeout_secs: self.sensors.discovery_timeout_secs,
            connection_timeout_secs: self.sensors.connection_timeout_secs,
        }
    }
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    directories::ProjectDirs::from("com", "providenceit", "ErgMode")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

/// Load the configuration, falling back to defaults when no file exists.
pub fn load_config() -> Result<EngineConfig, ConfigError> {
    load_config_from(&config_path())
}

/// Load configuration from a specific path.
pub fn load_config_from(path: &Path) -> Result<EngineConfig, ConfigError> {
    if !path.exists() {
        tracing::info!("No config file at {}, using defaults", path.display());
        return Ok(EngineConfig::default());
    }

    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
    let config: EngineConfig =
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    if !RiderProfile::validate_ftp(config.profile.ftp_watts) {
        return Err(ConfigError::InvalidValue(format!(
            "FTP {} out of range",
            config.profile.ftp_watts
        )));
    }

    Ok(config)
}

/// Save the configuration.
pub fn save_config(config: &EngineConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_path())
}

/// Save configuration to a specific path.
pub fn save_config_to(config: &EngineConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    tracing::info!("Config saved to {}", path.display());
    Ok(())
}

/// Errors from configuration handling.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File read/write error
    #[error("IO error: {0}")]
    IoError(String),

    /// TOML parse error
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// TOML serialize error
    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    /// Out-of-range or inconsistent value
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}
