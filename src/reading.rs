use std::{fmt, str::FromStr};

use anyhow::{Error, bail};
use chrono::{DateTime, Utc};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionStatus {
    Success,
    Retry,
    LocalOnly,
}

impl TransmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransmissionStatus::Success => "success",
            TransmissionStatus::Retry => "retry",
            TransmissionStatus::LocalOnly => "local_only",
        }
    }
}

impl fmt::Display for TransmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransmissionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(TransmissionStatus::Success),
            "retry" => Ok(TransmissionStatus::Retry),
            "local_only" => Ok(TransmissionStatus::LocalOnly),
            _ => bail!("unknown transmission status: {}", s),
        }
    }
}

/// One measurement cycle's output.
///
/// Everything except `transmission_status` and `signal_quality` is fixed
/// once the row has been written; those two are applied afterwards as a
/// single patch by the storage writer.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,

    pub station_id: String,

    pub raw_distance_mm: u32,

    pub snow_depth_mm: u32,

    pub sensor_temp_c: Option<f32>,

    pub battery_voltage: Option<f32>,

    pub signal_quality: Option<u8>,

    pub transmission_status: TransmissionStatus,
}

impl Reading {
    pub fn formatted_timestamp(&self) -> String {
        format_timestamp(&self.timestamp)
    }
}

pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Depth of snow above the calibrated bare-ground reference.
///
/// A surface farther away than the ground (misread, ground-height drift)
/// reports zero rather than a negative depth.
pub fn snow_depth_mm(ground_height_mm: u32, raw_distance_mm: u32) -> u32 {
    ground_height_mm.saturating_sub(raw_distance_mm)
}

/// Maps a LoRa RSSI (roughly -120 dBm weak to -30 dBm strong) onto 0-100.
pub fn signal_quality_from_rssi(rssi_dbm: i16) -> u8 {
    let quality = (i32::from(rssi_dbm) + 120) * 100 / 90;
    quality.clamp(0, 100) as u8
}
