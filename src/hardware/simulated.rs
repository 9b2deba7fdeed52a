//! Simulated hardware for `--simulate` runs and tests.
//!
//! Each type is a cheap handle around shared state: keep a clone to change
//! the simulated conditions while the station owns the other one.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::sleep;

use crate::{
    hardware::{
        LinkReport, ProbeError, RadioError, RadioLink, RangeSensor, SensorError, TemperatureProbe,
    },
    measurement::speed_of_sound_mps,
};

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct RangeState {
    distance_mm: f64,
    air_temp_c: f32,
    faults: VecDeque<SensorError>,
    pings: usize,
}

/// Ranging sensor aimed at a surface at a configurable distance.
#[derive(Debug, Clone)]
pub struct SimulatedRangeSensor {
    state: Arc<Mutex<RangeState>>,
}

impl SimulatedRangeSensor {
    pub fn new(distance_mm: f64, air_temp_c: f32) -> Self {
        Self {
            state: Arc::new(Mutex::new(RangeState {
                distance_mm,
                air_temp_c,
                faults: VecDeque::new(),
                pings: 0,
            })),
        }
    }

    pub fn set_distance_mm(&self, distance_mm: f64) {
        lock(&self.state).distance_mm = distance_mm;
    }

    pub fn set_air_temp_c(&self, air_temp_c: f32) {
        lock(&self.state).air_temp_c = air_temp_c;
    }

    /// Makes the next `count` pings fail with `error`.
    pub fn fail_next(&self, count: usize, error: SensorError) {
        let mut state = lock(&self.state);
        state.faults.extend(std::iter::repeat_n(error, count));
    }

    pub fn pings(&self) -> usize {
        lock(&self.state).pings
    }
}

impl RangeSensor for SimulatedRangeSensor {
    fn ping(&mut self, timeout: Duration) -> Result<Duration, SensorError> {
        let mut state = lock(&self.state);
        state.pings += 1;

        if let Some(error) = state.faults.pop_front() {
            return Err(error);
        }

        let round_trip_m = 2.0 * state.distance_mm / 1000.0;
        let echo = Duration::from_secs_f64(round_trip_m / speed_of_sound_mps(Some(state.air_temp_c)));
        if echo > timeout {
            return Err(SensorError::Timeout(timeout));
        }

        Ok(echo)
    }
}

/// Temperature probe reporting a settable value, or failing when unset.
#[derive(Debug, Clone)]
pub struct SimulatedProbe {
    celsius: Arc<Mutex<Option<f32>>>,
}

impl SimulatedProbe {
    pub fn new(celsius: Option<f32>) -> Self {
        Self {
            celsius: Arc::new(Mutex::new(celsius)),
        }
    }

    pub fn set_celsius(&self, celsius: Option<f32>) {
        *lock(&self.celsius) = celsius;
    }
}

impl TemperatureProbe for SimulatedProbe {
    fn read_celsius(&mut self) -> Result<f32, ProbeError> {
        (*lock(&self.celsius)).ok_or(ProbeError::Unavailable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCondition {
    /// Packets are accepted.
    Up,
    /// Radio reachable but every send fails.
    Rejecting,
    /// No radio or no peer.
    Down,
}

#[derive(Debug)]
struct RadioState {
    condition: LinkCondition,
    rssi_dbm: Option<i16>,
    latency: Duration,
    attempts: usize,
    delivered: Vec<Vec<u8>>,
}

/// Radio link whose condition, RSSI and latency can be changed at runtime.
#[derive(Debug, Clone)]
pub struct SimulatedRadio {
    state: Arc<Mutex<RadioState>>,
}

impl SimulatedRadio {
    pub fn new(condition: LinkCondition) -> Self {
        Self {
            state: Arc::new(Mutex::new(RadioState {
                condition,
                rssi_dbm: Some(-75),
                latency: Duration::ZERO,
                attempts: 0,
                delivered: Vec::new(),
            })),
        }
    }

    pub fn set_condition(&self, condition: LinkCondition) {
        lock(&self.state).condition = condition;
    }

    pub fn set_rssi_dbm(&self, rssi_dbm: Option<i16>) {
        lock(&self.state).rssi_dbm = rssi_dbm;
    }

    /// Time each send takes before it resolves.
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.state).latency = latency;
    }

    pub fn attempts(&self) -> usize {
        lock(&self.state).attempts
    }

    /// Payloads accepted so far, in order.
    pub fn delivered(&self) -> Vec<Vec<u8>> {
        lock(&self.state).delivered.clone()
    }
}

#[async_trait]
impl RadioLink for SimulatedRadio {
    async fn transmit(&mut self, payload: &[u8]) -> Result<LinkReport, RadioError> {
        let latency = {
            let mut state = lock(&self.state);
            state.attempts += 1;
            state.latency
        };

        if !latency.is_zero() {
            sleep(latency).await;
        }

        let mut state = lock(&self.state);
        match state.condition {
            LinkCondition::Up => {
                state.delivered.push(payload.to_vec());
                Ok(LinkReport {
                    rssi_dbm: state.rssi_dbm,
                })
            }
            LinkCondition::Rejecting => Err(RadioError::Timeout(Duration::from_secs(3))),
            LinkCondition::Down => Err(RadioError::Unavailable("no peer in range".to_string())),
        }
    }
}
