use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    config::BackupSyncMode,
    reading::{Reading, TransmissionStatus},
    storage::{BackupReachability, CsvLog, StorageError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorState {
    /// No backup path configured.
    Disabled,
    /// Every row written so far is on the backup medium.
    Synced,
    /// Rows waiting for the next deferred flush.
    Pending(usize),
    /// The backup medium is unreachable or failed; rows are held in the queue.
    Degraded { pending: usize },
}

impl MirrorState {
    pub fn pending(&self) -> usize {
        match *self {
            MirrorState::Disabled | MirrorState::Synced => 0,
            MirrorState::Pending(pending) | MirrorState::Degraded { pending } => pending,
        }
    }
}

/// Copy of the primary log on a secondary medium.
///
/// Rows go through a bounded FIFO queue so that rows held back while the
/// medium was away always land before newer ones.
#[derive(Debug)]
pub struct Mirror {
    log: CsvLog,
    mode: BackupSyncMode,
    reachability: BackupReachability,
    queue: VecDeque<Reading>,
    capacity: usize,
}

impl Mirror {
    pub fn new(
        log: CsvLog,
        mode: BackupSyncMode,
        capacity: usize,
        reachability: BackupReachability,
    ) -> Self {
        Self {
            log,
            mode,
            reachability,
            queue: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn log(&self) -> &CsvLog {
        &self.log
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Hands a freshly written primary row to the mirror.
    pub fn submit(&mut self, reading: &Reading) -> MirrorState {
        match self.mode {
            BackupSyncMode::Immediate => {
                self.enqueue(reading.clone());
                self.flush()
            }
            BackupSyncMode::Deferred => {
                let state = self.flush();
                self.enqueue(reading.clone());
                match state {
                    MirrorState::Degraded { .. } => MirrorState::Degraded {
                        pending: self.queue.len(),
                    },
                    _ => MirrorState::Pending(self.queue.len()),
                }
            }
        }
    }

    /// Writes queued rows to the backup in order, stopping at the first
    /// failure so the remainder keeps its place.
    pub fn flush(&mut self) -> MirrorState {
        if self.queue.is_empty() {
            return MirrorState::Synced;
        }

        if !self.reachability.is_reachable() {
            warn!(
                dir = ?self.log.dir(),
                pending = self.queue.len(),
                "backup unreachable, mirror degraded"
            );
            return MirrorState::Degraded {
                pending: self.queue.len(),
            };
        }

        let mut flushed = 0;
        while let Some(reading) = self.queue.front() {
            if let Err(e) = self.log.upsert(reading) {
                warn!(
                    error = %e,
                    pending = self.queue.len(),
                    "backup write failed, mirror degraded"
                );
                return MirrorState::Degraded {
                    pending: self.queue.len(),
                };
            }
            self.queue.pop_front();
            flushed += 1;
        }

        if flushed > 1 {
            info!(flushed, "replayed queued rows to backup");
        } else {
            debug!("row mirrored to backup");
        }

        MirrorState::Synced
    }

    /// Applies a transmission outcome to the mirrored copy of a row.
    ///
    /// `current` supplies the full row when the patch has to be queued as a
    /// superseding copy.
    pub fn patch(
        &mut self,
        timestamp: &DateTime<Utc>,
        status: TransmissionStatus,
        signal_quality: Option<u8>,
        current: impl FnOnce() -> Option<Reading>,
    ) {
        if let Some(queued) = self
            .queue
            .iter_mut()
            .rev()
            .find(|r| r.timestamp == *timestamp)
        {
            queued.transmission_status = status;
            queued.signal_quality = signal_quality;
            return;
        }

        if self.reachability.is_reachable() {
            match self.log.patch(timestamp, status, signal_quality) {
                Ok(_) => return,
                Err(StorageError::RowNotFound { .. }) => {}
                Err(e) => warn!(error = %e, "failed to patch backup row, queueing a copy"),
            }
        }

        match current() {
            Some(reading) => self.enqueue(reading),
            None => warn!(
                timestamp = %timestamp,
                "row to patch on backup no longer exists in the primary log"
            ),
        }
    }

    fn enqueue(&mut self, reading: Reading) {
        if self.queue.len() >= self.capacity
            && let Some(dropped) = self.queue.pop_front()
        {
            warn!(
                timestamp = %dropped.formatted_timestamp(),
                capacity = self.capacity,
                "backup queue full, dropped oldest row"
            );
        }
        self.queue.push_back(reading);
    }
}
