use std::{io, path::PathBuf, time::Duration};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SensorError {
    #[error("no echo within {0:?}")]
    Timeout(Duration),

    #[error("distance {distance_mm} mm outside sensor range {min_mm}-{max_mm} mm")]
    OutOfRange {
        distance_mm: u32,
        min_mm: u32,
        max_mm: u32,
    },

    #[error("sensor GPIO error: {0}")]
    Gpio(String),
}

impl SensorError {
    /// Faults worth one immediate re-trigger within the same cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, SensorError::Timeout(_) | SensorError::OutOfRange { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SensorError::Timeout(_) => "timeout",
            SensorError::OutOfRange { .. } => "out_of_range",
            SensorError::Gpio(_) => "gpio",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("no DS18B20 device found under {0:?}")]
    NotFound(PathBuf),

    #[error("failed to read probe: {0}")]
    Io(#[from] io::Error),

    #[error("no valid reading after {0} attempts")]
    InvalidReading(usize),

    #[error("probe unavailable")]
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RadioError {
    #[error("radio unavailable: {0}")]
    Unavailable(String),

    #[error("transmission not confirmed within {0:?}")]
    Timeout(Duration),

    #[error("unexpected radio version register 0x{0:02x}")]
    InvalidVersion(u8),

    #[error("packet of {0} bytes exceeds the LoRa payload limit")]
    PacketTooLarge(usize),

    #[error("radio bus error: {0}")]
    Bus(String),
}

impl RadioError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, RadioError::Unavailable(_))
    }
}
