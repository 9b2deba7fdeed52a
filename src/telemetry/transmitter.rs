use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::{
    config::{Backoff, RadioConfig},
    hardware::RadioLink,
    reading::{Reading, TransmissionStatus, signal_quality_from_rssi},
    telemetry::format_message,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmissionOutcome {
    pub status: TransmissionStatus,
    /// Present whenever the link was reached; absent for `local_only`.
    pub signal_quality: Option<u8>,
    pub attempts: u32,
}

/// What the current send has observed so far.
#[derive(Debug, Default)]
struct Progress {
    attempts: u32,
    reached: bool,
    rssi_dbm: Option<i16>,
}

impl Progress {
    /// Quality of the RSSI reported during this send, 0 if none was.
    fn signal_quality(&self) -> u8 {
        self.rssi_dbm.map(signal_quality_from_rssi).unwrap_or(0)
    }
}

/// Delivers readings over the radio link with bounded retries.
pub struct TelemetryTransmitter {
    link: Box<dyn RadioLink>,
    max_attempts: u32,
    backoff: Backoff,
    window: Duration,
}

impl TelemetryTransmitter {
    pub fn new(config: &RadioConfig, link: Box<dyn RadioLink>) -> Self {
        Self {
            link,
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff,
            window: config.transmission_window,
        }
    }

    /// Sends `reading`, giving up once the transmission window has elapsed.
    ///
    /// Never fails: every problem is folded into the returned status.
    pub async fn send(&mut self, reading: &Reading) -> TransmissionOutcome {
        let payload = format_message(reading);
        let window = self.window;
        let mut progress = Progress::default();

        let result = timeout(window, self.attempt(payload.as_bytes(), &mut progress)).await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    ?window,
                    attempts = progress.attempts,
                    "transmission window elapsed, send abandoned"
                );
                TransmissionOutcome {
                    status: TransmissionStatus::LocalOnly,
                    signal_quality: None,
                    attempts: progress.attempts,
                }
            }
        };

        match outcome.status {
            TransmissionStatus::Success => info!(
                status = %outcome.status,
                attempts = outcome.attempts,
                signal_quality = ?outcome.signal_quality,
                "reading transmitted"
            ),
            _ => warn!(
                status = %outcome.status,
                attempts = outcome.attempts,
                "reading not delivered"
            ),
        }

        outcome
    }

    async fn attempt(&mut self, payload: &[u8], progress: &mut Progress) -> TransmissionOutcome {
        for attempt in 1..=self.max_attempts {
            progress.attempts = attempt;

            match self.link.transmit(payload).await {
                Ok(report) => {
                    if report.rssi_dbm.is_some() {
                        progress.rssi_dbm = report.rssi_dbm;
                    }
                    return TransmissionOutcome {
                        status: TransmissionStatus::Success,
                        signal_quality: Some(progress.signal_quality()),
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    progress.reached |= !e.is_unreachable();
                    warn!(attempt, max_attempts = self.max_attempts, error = %e, "transmission attempt failed");
                }
            }

            if attempt < self.max_attempts {
                sleep(self.backoff.delay_after(attempt)).await;
            }
        }

        if progress.reached {
            TransmissionOutcome {
                status: TransmissionStatus::Retry,
                signal_quality: Some(progress.signal_quality()),
                attempts: progress.attempts,
            }
        } else {
            TransmissionOutcome {
                status: TransmissionStatus::LocalOnly,
                signal_quality: None,
                attempts: progress.attempts,
            }
        }
    }
}
