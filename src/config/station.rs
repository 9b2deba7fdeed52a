use std::{path::PathBuf, time::Duration};

use serde::Deserialize;

/// GPIO pins (BCM numbering) claimed by the LoRa radio bonnet and its OLED:
/// I2C (2, 3), SPI0 with CE1 (7-11) and the radio reset line (25).
pub const RESERVED_PINS: [u8; 8] = [2, 3, 7, 8, 9, 10, 11, 25];

/// Station ids shipped in templates that must be replaced before deployment.
pub const PLACEHOLDER_STATION_IDS: [&str; 3] = ["STN_XX", "TEMPLATE", "CHANGE_ME"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupSyncMode {
    #[default]
    Immediate,
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StationConfig {
    pub station_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_m: f64,
    /// Sensor-to-bare-ground distance, the zero-depth reference.
    pub ground_height_mm: u32,
    pub pins: Pins,
    pub measurement: MeasurementConfig,
    pub storage: StorageConfig,
    pub radio: RadioConfig,
    pub install_date: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pins {
    pub trigger: u8,
    pub echo: u8,
    /// 1-Wire data pin, `None` when the temperature probe is disabled.
    pub temperature: Option<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementConfig {
    pub interval: Duration,
    pub samples_per_reading: usize,
    pub min_range_mm: u32,
    pub max_range_mm: u32,
    pub echo_timeout: Duration,
    pub fallback_temperature_c: Option<f32>,
    pub w1_devices_path: PathBuf,
    pub battery_voltage_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub primary_path: PathBuf,
    pub backup_path: Option<PathBuf>,
    pub backup_sync_mode: BackupSyncMode,
    pub backup_required: bool,
    /// Only treat the backup as reachable while it is a distinct mount.
    pub backup_require_mount: bool,
    pub backup_queue_capacity: usize,
    pub backup_poll_interval: Duration,
    pub max_files: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RadioConfig {
    pub frequency_mhz: f64,
    pub spreading_factor: u8,
    pub bandwidth_hz: u32,
    pub tx_power_dbm: i8,
    pub station_address: u8,
    pub base_station_address: u8,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub transmission_window: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff() {
        let backoff = Backoff::Fixed(Duration::from_millis(500));
        assert_eq!(backoff.delay_after(1), Duration::from_millis(500));
        assert_eq!(backoff.delay_after(5), Duration::from_millis(500));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let backoff = Backoff::Exponential {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(3),
        };
        assert_eq!(backoff.delay_after(1), Duration::from_millis(500));
        assert_eq!(backoff.delay_after(2), Duration::from_secs(1));
        assert_eq!(backoff.delay_after(3), Duration::from_secs(2));
        assert_eq!(backoff.delay_after(4), Duration::from_secs(3));
        assert_eq!(backoff.delay_after(40), Duration::from_secs(3));
    }
}
