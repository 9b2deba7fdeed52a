//! Capability interfaces for the station's hardware.
//!
//! The measurement and telemetry code only sees these traits. Each has a
//! real implementation for the Raspberry Pi and a simulated one that can be
//! scripted from tests.

mod absent;
mod ds18b20;
mod error;
mod hcsr04;
mod rfm95;
mod simulated;

use std::time::Duration;

use async_trait::async_trait;

pub use absent::*;
pub use ds18b20::*;
pub use error::*;
pub use hcsr04::*;
pub use rfm95::*;
pub use simulated::*;

/// Ultrasonic time-of-flight ranging sensor.
pub trait RangeSensor: Send {
    /// Fires one trigger pulse and returns the width of the echo pulse.
    ///
    /// Blocks for at most roughly twice `timeout`. No echo is
    /// [`SensorError::Timeout`], never a zero duration.
    fn ping(&mut self, timeout: Duration) -> Result<Duration, SensorError>;
}

/// Ambient air temperature probe.
pub trait TemperatureProbe: Send {
    fn read_celsius(&mut self) -> Result<f32, ProbeError>;
}

/// Link-layer report for an accepted packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkReport {
    pub rssi_dbm: Option<i16>,
}

/// Long-range radio used to deliver readings to the base station.
#[async_trait]
pub trait RadioLink: Send {
    /// Sends one packet. `Ok` means the link layer accepted it.
    ///
    /// [`RadioError::Unavailable`] means the link could not be reached at
    /// all; any other error means it was reachable but the send failed.
    async fn transmit(&mut self, payload: &[u8]) -> Result<LinkReport, RadioError>;
}
