use std::{sync::Arc, time::Duration};

use chrono::{DateTime, SubsecRound as _, TimeDelta, Utc};
use tokio::{
    sync::watch,
    time::{Instant, sleep_until},
};
use tracing::{debug, error, info, warn};

use crate::{
    config::StationConfig,
    measurement::MeasurementEngine,
    reading::Reading,
    station::{CycleError, StationState, WallClock},
    storage::{MirrorState, StorageWriter, WriteResult},
    telemetry::{TelemetryTransmitter, TransmissionOutcome},
};

/// What one successful cycle produced.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// The row as finally stored, transmission outcome included.
    pub reading: Reading,
    pub write: WriteResult,
    pub transmission: TransmissionOutcome,
}

/// Ties measurement, storage and telemetry into the fixed-cadence loop.
pub struct Station {
    config: Arc<StationConfig>,
    engine: MeasurementEngine,
    storage: StorageWriter,
    transmitter: TelemetryTransmitter,
    clock: Box<dyn WallClock>,
    state: StationState,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Station {
    pub fn new(
        config: Arc<StationConfig>,
        engine: MeasurementEngine,
        storage: StorageWriter,
        transmitter: TelemetryTransmitter,
        clock: Box<dyn WallClock>,
    ) -> Self {
        Self {
            config,
            engine,
            storage,
            transmitter,
            clock,
            state: StationState::Idle,
            last_timestamp: None,
        }
    }

    pub fn state(&self) -> StationState {
        self.state
    }

    pub fn storage(&self) -> &StorageWriter {
        &self.storage
    }

    /// Measure, store, transmit, then record the transmission outcome.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, CycleError> {
        let timestamp = self.next_timestamp();
        let result = self.cycle(timestamp).await;
        self.state = StationState::Idle;
        result
    }

    async fn cycle(&mut self, timestamp: DateTime<Utc>) -> Result<CycleReport, CycleError> {
        self.state = StationState::Measuring;
        let mut reading = self.engine.measure(timestamp)?;

        self.state = StationState::Storing;
        let write = self.storage.write(&reading)?;
        debug!(path = ?write.path, mirror = ?write.mirror, "reading stored");

        self.state = StationState::Transmitting;
        let transmission = self.transmitter.send(&reading).await;

        self.state = StationState::Storing;
        self.storage.patch_status(
            &reading.timestamp,
            transmission.status,
            transmission.signal_quality,
        )?;
        reading.transmission_status = transmission.status;
        reading.signal_quality = transmission.signal_quality;

        info!(
            timestamp = %reading.formatted_timestamp(),
            raw_distance_mm = reading.raw_distance_mm,
            snow_depth_mm = reading.snow_depth_mm,
            sensor_temp_c = ?reading.sensor_temp_c,
            status = %reading.transmission_status,
            "cycle complete"
        );

        Ok(CycleReport {
            reading,
            write,
            transmission,
        })
    }

    /// Whole-second timestamps, strictly increasing within this process so
    /// that each row keeps a unique key even if the wall clock steps back.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = self.clock.now().trunc_subsecs(0);
        let timestamp = match self.last_timestamp {
            Some(last) if now <= last => {
                warn!(
                    now = %now,
                    last = %last,
                    "wall clock did not advance, bumping timestamp"
                );
                last + TimeDelta::seconds(1)
            }
            _ => now,
        };
        self.last_timestamp = Some(timestamp);
        timestamp
    }

    /// Runs cycles at `start + n * interval` until `shutdown` turns true.
    ///
    /// Shutdown is only observed between cycles, so no write is ever cut
    /// short. Slots missed because a cycle overran are skipped.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> MirrorState {
        let interval = self.config.measurement.interval;
        let mut next = Instant::now();

        info!(
            station_id = %self.config.station_id,
            ?interval,
            "station loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.run_cycle().await {
                error!(stage = %e.stage(), kind = e.kind(), error = %e, "cycle failed");
            }

            next = next_slot(next, interval, Instant::now());
            if wait_until(next, &mut shutdown).await {
                break;
            }
        }

        let mirror = self.storage.reconcile();
        info!(pending = mirror.pending(), "station loop stopped");
        mirror
    }

    /// Diagnostic entry point: one cycle, then a mirror reconciliation.
    pub async fn run_once(&mut self) -> Result<CycleReport, CycleError> {
        let result = self.run_cycle().await;
        if let Err(e) = &result {
            error!(stage = %e.stage(), kind = e.kind(), error = %e, "cycle failed");
        }

        let mirror = self.storage.reconcile();
        debug!(?mirror, "mirror reconciled");

        result
    }
}

/// First slot after `previous` that is not already in the past.
fn next_slot(previous: Instant, interval: Duration, now: Instant) -> Instant {
    let next = previous + interval;
    if now <= next {
        return next;
    }

    let behind = now - next;
    let missed = (behind.as_nanos() / interval.as_nanos().max(1)) as u32 + 1;
    warn!(missed, "cycle overran its interval, skipping missed slots");
    next + interval * missed
}

/// Sleeps until `deadline`; returns true if shutdown was requested first.
async fn wait_until(deadline: Instant, shutdown: &mut watch::Receiver<bool>) -> bool {
    loop {
        tokio::select! {
            _ = sleep_until(deadline) => return false,
            changed = shutdown.changed() => match changed {
                Ok(()) if *shutdown.borrow() => return true,
                Ok(()) => {}
                Err(_) => {
                    sleep_until(deadline).await;
                    return false;
                }
            },
        }
    }
}
