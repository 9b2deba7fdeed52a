use std::{ffi::OsStr, path::Path};

use serde::Deserialize;

use crate::config::{BackoffKind, BackupSyncMode, ConfigError};

/// Station configuration exactly as written in the configuration file.
///
/// Every field is optional here so that validation can report all missing
/// and invalid values in one pass instead of stopping at the first.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub station_id: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation_m: Option<f64>,
    pub ground_height_mm: Option<u32>,

    pub trigger_pin: Option<u8>,
    pub echo_pin: Option<u8>,
    pub temp_sensor_enabled: Option<bool>,
    pub temp_sensor_pin: Option<u8>,

    pub measurement_interval_seconds: Option<u64>,
    pub samples_per_reading: Option<usize>,
    pub sensor_min_range_mm: Option<u32>,
    pub sensor_max_range_mm: Option<u32>,
    pub echo_timeout_ms: Option<u64>,
    pub fallback_temperature_c: Option<f32>,
    pub w1_devices_path: Option<String>,
    pub battery_voltage_path: Option<String>,

    pub primary_storage_path: Option<String>,
    /// Single storage directory used by older station configs.
    pub local_storage_path: Option<String>,
    pub backup_storage_path: Option<String>,
    pub backup_sync_mode: Option<BackupSyncMode>,
    pub backup_required: Option<bool>,
    pub backup_require_mount: Option<bool>,
    pub backup_queue_capacity: Option<usize>,
    pub backup_poll_seconds: Option<u64>,
    pub max_local_files: Option<usize>,

    pub lora_frequency: Option<f64>,
    pub lora_spreading_factor: Option<u8>,
    pub lora_bandwidth: Option<u32>,
    pub lora_tx_power: Option<i8>,
    pub station_address: Option<u8>,
    pub base_station_address: Option<u8>,
    pub tx_max_attempts: Option<u32>,
    pub tx_backoff: Option<BackoffKind>,
    pub tx_backoff_ms: Option<u64>,
    pub tx_backoff_max_ms: Option<u64>,
    pub tx_window_seconds: Option<u64>,

    pub install_date: Option<String>,
    pub notes: Option<String>,
}

impl RawConfig {
    pub fn parse(s: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        match format {
            ConfigFormat::Yaml => Self::from_yaml_str(s),
            ConfigFormat::Toml => Self::from_toml_str(s),
        }
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
}

impl ConfigFormat {
    /// `.toml` files are read as TOML, everything else as YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(OsStr::to_str) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Yaml,
        }
    }
}
