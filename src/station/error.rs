use std::fmt;

use crate::{hardware::SensorError, storage::StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationState {
    Idle,
    Measuring,
    Storing,
    Transmitting,
}

impl StationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StationState::Idle => "idle",
            StationState::Measuring => "measuring",
            StationState::Storing => "storing",
            StationState::Transmitting => "transmitting",
        }
    }
}

impl fmt::Display for StationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a single cycle was abandoned. Never fatal to the station.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("measurement failed: {0}")]
    Measurement(#[from] SensorError),

    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),
}

impl CycleError {
    /// Stage the cycle was in when it failed.
    pub fn stage(&self) -> StationState {
        match self {
            CycleError::Measurement(_) => StationState::Measuring,
            CycleError::Storage(_) => StationState::Storing,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::Measurement(e) => e.kind(),
            CycleError::Storage(e) => e.kind(),
        }
    }
}
