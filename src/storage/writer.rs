use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::{
    config::StorageConfig,
    reading::{Reading, TransmissionStatus},
    storage::{BackupReachability, CsvLog, Mirror, MirrorState, PatchOutcome, StorageError},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResult {
    /// Primary day file the row was appended to.
    pub path: PathBuf,
    pub mirror: MirrorState,
}

/// Sole writer of the primary log and its optional mirror.
#[derive(Debug)]
pub struct StorageWriter {
    primary: CsvLog,
    mirror: Option<Mirror>,
}

impl StorageWriter {
    pub fn new(config: &StorageConfig, station_id: &str, reachability: BackupReachability) -> Self {
        let primary = CsvLog::new(&config.primary_path, station_id, config.max_files);
        let mirror = config.backup_path.as_ref().map(|path| {
            Mirror::new(
                CsvLog::new(path, station_id, config.max_files),
                config.backup_sync_mode,
                config.backup_queue_capacity,
                reachability,
            )
        });

        Self { primary, mirror }
    }

    pub fn primary(&self) -> &CsvLog {
        &self.primary
    }

    pub fn mirror(&self) -> Option<&Mirror> {
        self.mirror.as_ref()
    }

    /// Appends `reading` to the primary log, then hands it to the mirror.
    ///
    /// Only a primary failure is an error; mirror trouble is reported through
    /// [`WriteResult::mirror`].
    pub fn write(&mut self, reading: &Reading) -> Result<WriteResult, StorageError> {
        let path = self.primary.append(reading)?;

        let mirror = match &mut self.mirror {
            Some(mirror) => mirror.submit(reading),
            None => MirrorState::Disabled,
        };

        Ok(WriteResult { path, mirror })
    }

    /// Records the transmission outcome of the row stamped `timestamp`.
    pub fn patch_status(
        &mut self,
        timestamp: &DateTime<Utc>,
        status: TransmissionStatus,
        signal_quality: Option<u8>,
    ) -> Result<PatchOutcome, StorageError> {
        let outcome = self.primary.patch(timestamp, status, signal_quality)?;

        if outcome == PatchOutcome::Patched
            && let Some(mirror) = &mut self.mirror
        {
            let primary = &self.primary;
            mirror.patch(timestamp, status, signal_quality, || {
                match primary.read_day(timestamp.date_naive()) {
                    Ok(rows) => rows.into_iter().find(|r| r.timestamp == *timestamp),
                    Err(e) => {
                        warn!(error = %e, "failed to re-read primary row for the backup");
                        None
                    }
                }
            });
        }

        Ok(outcome)
    }

    /// Flushes whatever the mirror still holds.
    pub fn reconcile(&mut self) -> MirrorState {
        match &mut self.mirror {
            Some(mirror) => mirror.flush(),
            None => MirrorState::Disabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, time::Duration};

    use super::*;
    use crate::config::BackupSyncMode;

    fn storage_config(primary: PathBuf, backup: Option<PathBuf>) -> StorageConfig {
        StorageConfig {
            primary_path: primary,
            backup_path: backup,
            backup_sync_mode: BackupSyncMode::Immediate,
            backup_required: false,
            backup_require_mount: false,
            backup_queue_capacity: 16,
            backup_poll_interval: Duration::from_secs(30),
            max_files: 30,
        }
    }

    fn reading() -> Reading {
        Reading {
            timestamp: "2024-01-15T14:30:00Z".parse().unwrap(),
            station_id: "STN_01".to_string(),
            raw_distance_mm: 1850,
            snow_depth_mm: 150,
            sensor_temp_c: Some(-5.2),
            battery_voltage: None,
            signal_quality: None,
            transmission_status: TransmissionStatus::LocalOnly,
        }
    }

    #[test]
    fn test_write_without_backup() {
        let dir = tempfile::tempdir().unwrap();
        let config = storage_config(dir.path().to_path_buf(), None);
        let mut writer = StorageWriter::new(&config, "STN_01", BackupReachability::new(false));

        let result = writer.write(&reading()).unwrap();
        assert_eq!(result.path, dir.path().join("STN_01_2024-01-15.csv"));
        assert_eq!(result.mirror, MirrorState::Disabled);
        assert_eq!(writer.reconcile(), MirrorState::Disabled);
    }

    #[test]
    fn test_primary_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = storage_config(dir.path().join("gone"), None);
        let mut writer = StorageWriter::new(&config, "STN_01", BackupReachability::new(false));

        let err = writer.write(&reading()).unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }), "{err}");
    }

    #[test]
    fn test_backup_failure_does_not_fail_the_write() {
        let primary = tempfile::tempdir().unwrap();
        let backup = tempfile::tempdir().unwrap();
        let backup_path = backup.path().join("usb");
        let config = storage_config(primary.path().to_path_buf(), Some(backup_path.clone()));
        // Reported reachable, but the directory is missing.
        let mut writer = StorageWriter::new(&config, "STN_01", BackupReachability::new(true));

        let result = writer.write(&reading()).unwrap();
        assert_eq!(result.mirror, MirrorState::Degraded { pending: 1 });

        fs::create_dir(&backup_path).unwrap();
        assert_eq!(writer.reconcile(), MirrorState::Synced);
        assert_eq!(
            writer.mirror().unwrap().log().read_all().unwrap(),
            vec![reading()]
        );
    }

    #[test]
    fn test_patch_reaches_primary_and_mirror() {
        let primary = tempfile::tempdir().unwrap();
        let backup = tempfile::tempdir().unwrap();
        let config = storage_config(
            primary.path().to_path_buf(),
            Some(backup.path().to_path_buf()),
        );
        let mut writer = StorageWriter::new(&config, "STN_01", BackupReachability::new(true));
        let row = reading();
        writer.write(&row).unwrap();

        let outcome = writer
            .patch_status(&row.timestamp, TransmissionStatus::Success, Some(61))
            .unwrap();
        assert_eq!(outcome, PatchOutcome::Patched);

        let expected = vec![Reading {
            signal_quality: Some(61),
            transmission_status: TransmissionStatus::Success,
            ..row.clone()
        }];
        assert_eq!(writer.primary().read_all().unwrap(), expected);
        assert_eq!(writer.mirror().unwrap().log().read_all().unwrap(), expected);

        let again = writer
            .patch_status(&row.timestamp, TransmissionStatus::Success, Some(61))
            .unwrap();
        assert_eq!(again, PatchOutcome::Unchanged);
    }
}
