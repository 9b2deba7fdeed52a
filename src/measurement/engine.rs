use std::{sync::Arc, thread, time::Duration};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::{
    config::StationConfig,
    hardware::{RangeSensor, SensorError, TemperatureProbe},
    measurement::{echo_to_distance_mm, read_battery_voltage, speed_of_sound_mps},
    reading::{Reading, TransmissionStatus, snow_depth_mm},
};

/// Minimum spacing between HC-SR04 pings so stray echoes die out.
const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(60);

/// Drives the ranging sensor and temperature probe to produce [`Reading`]s.
pub struct MeasurementEngine {
    config: Arc<StationConfig>,
    sensor: Box<dyn RangeSensor>,
    probe: Box<dyn TemperatureProbe>,
    sample_interval: Duration,
}

impl MeasurementEngine {
    pub fn new(
        config: Arc<StationConfig>,
        sensor: Box<dyn RangeSensor>,
        probe: Box<dyn TemperatureProbe>,
    ) -> Self {
        Self {
            config,
            sensor,
            probe,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }

    pub fn with_sample_interval(mut self, sample_interval: Duration) -> Self {
        self.sample_interval = sample_interval;
        self
    }

    /// Takes one temperature-compensated reading stamped with `timestamp`.
    ///
    /// A timeout or out-of-range result is re-triggered once before the
    /// error is returned. The row starts out as `local_only` with no signal
    /// quality until the transmitter has run.
    pub fn measure(&mut self, timestamp: DateTime<Utc>) -> Result<Reading, SensorError> {
        let sensor_temp_c = self.read_temperature();
        let speed = speed_of_sound_mps(
            sensor_temp_c.or(self.config.measurement.fallback_temperature_c),
        );

        let raw_distance_mm = match self.range_mm(speed) {
            Err(e) if e.is_transient() => {
                warn!(error = %e, kind = e.kind(), "range measurement failed, re-triggering");
                self.range_mm(speed)?
            }
            result => result?,
        };

        let battery_voltage = self
            .config
            .measurement
            .battery_voltage_path
            .as_deref()
            .and_then(read_battery_voltage);

        Ok(Reading {
            timestamp,
            station_id: self.config.station_id.clone(),
            raw_distance_mm,
            snow_depth_mm: snow_depth_mm(self.config.ground_height_mm, raw_distance_mm),
            sensor_temp_c,
            battery_voltage,
            signal_quality: None,
            transmission_status: TransmissionStatus::LocalOnly,
        })
    }

    fn read_temperature(&mut self) -> Option<f32> {
        match self.probe.read_celsius() {
            Ok(celsius) => Some((celsius * 10.0).round() / 10.0),
            Err(e) => {
                warn!(
                    error = %e,
                    fallback_c = ?self.config.measurement.fallback_temperature_c,
                    "temperature probe unavailable, compensating with fallback"
                );
                None
            }
        }
    }

    /// Median of the in-range samples, in whole millimetres.
    fn range_mm(&mut self, speed_of_sound_mps: f64) -> Result<u32, SensorError> {
        let measurement = &self.config.measurement;
        let (min_mm, max_mm) = (measurement.min_range_mm, measurement.max_range_mm);

        let mut samples = Vec::with_capacity(measurement.samples_per_reading);
        let mut last_error = None;

        for i in 0..measurement.samples_per_reading {
            if i > 0 && !self.sample_interval.is_zero() {
                thread::sleep(self.sample_interval);
            }

            let distance_mm = match self.sensor.ping(measurement.echo_timeout) {
                Ok(echo) => echo_to_distance_mm(echo, speed_of_sound_mps).round() as u32,
                Err(e) => {
                    debug!(sample = i, error = %e, "ping failed");
                    last_error = Some(e);
                    continue;
                }
            };

            if (min_mm..=max_mm).contains(&distance_mm) {
                samples.push(distance_mm);
            } else {
                last_error = Some(SensorError::OutOfRange {
                    distance_mm,
                    min_mm,
                    max_mm,
                });
            }
        }

        median(&mut samples)
            .ok_or_else(|| last_error.unwrap_or(SensorError::Timeout(measurement.echo_timeout)))
    }
}

fn median(samples: &mut [u32]) -> Option<u32> {
    if samples.is_empty() {
        return None;
    }

    samples.sort_unstable();
    let mid = samples.len() / 2;
    if samples.len() % 2 == 0 {
        Some(((u64::from(samples[mid - 1]) + u64::from(samples[mid]) + 1) / 2) as u32)
    } else {
        Some(samples[mid])
    }
}
