use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use snow_station::{
    config::{self, ConfigError, StationConfig},
    hardware::{LinkCondition, SensorError, SimulatedProbe, SimulatedRadio, SimulatedRangeSensor},
    measurement::MeasurementEngine,
    reading::TransmissionStatus,
    station::{CycleError, SimulatedClock, Station, StationState},
    storage::{
        BackupReachability, MirrorState, PatchOutcome, StorageWriter, format_row, probe_backup,
        spawn_reachability_poller,
    },
    telemetry::TelemetryTransmitter,
};
use tempfile::TempDir;
use tokio::{sync::watch, time::Instant};

const DAY: &str = "2024-01-15";

struct Rig {
    station: Station,
    sensor: SimulatedRangeSensor,
    radio: SimulatedRadio,
    reachability: BackupReachability,
    config: Arc<StationConfig>,
    dir: TempDir,
}

impl Rig {
    fn primary_file(&self) -> PathBuf {
        self.dir.path().join("primary").join(format!("STN_01_{DAY}.csv"))
    }
}

fn write_config(dir: &Path, extra: &str) -> PathBuf {
    let path = dir.join("station_01.yaml");
    fs::write(
        &path,
        format!(
            r#"
station_id: STN_01
latitude: 45.1
longitude: -111.2
elevation_m: 1200
ground_height_mm: 2000
trigger_pin: 23
echo_pin: 24
temp_sensor_pin: 4
primary_storage_path: {}
{extra}
"#,
            dir.join("primary").display()
        ),
    )
    .unwrap();
    path
}

fn rig(extra: &str) -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(config::load(&write_config(dir.path(), extra)).unwrap());

    let sensor = SimulatedRangeSensor::new(1850.0, -5.2);
    let probe = SimulatedProbe::new(Some(-5.2));
    let radio = SimulatedRadio::new(LinkCondition::Up);

    let reachability = BackupReachability::new(
        config
            .storage
            .backup_path
            .as_deref()
            .is_some_and(|p| probe_backup(p, false)),
    );

    let engine = MeasurementEngine::new(
        config.clone(),
        Box::new(sensor.clone()),
        Box::new(probe),
    )
    .with_sample_interval(Duration::ZERO);
    let storage = StorageWriter::new(
        &config.storage,
        &config.station_id,
        reachability.clone(),
    );
    let transmitter = TelemetryTransmitter::new(&config.radio, Box::new(radio.clone()));
    let start: DateTime<Utc> = format!("{DAY}T14:30:00Z").parse().unwrap();
    let station = Station::new(
        config.clone(),
        engine,
        storage,
        transmitter,
        Box::new(SimulatedClock::new(start)),
    );

    Rig {
        station,
        sensor,
        radio,
        reachability,
        config,
        dir,
    }
}

async fn next_interval(rig: &Rig) {
    tokio::time::sleep(rig.config.measurement.interval).await;
}

#[tokio::test(start_paused = true)]
async fn sensor_timing_out_twice_skips_only_that_cycle() {
    let mut rig = rig("samples_per_reading: 1");
    rig.sensor
        .fail_next(2, SensorError::Timeout(Duration::from_millis(40)));

    let err = rig.station.run_cycle().await.unwrap_err();
    assert!(matches!(err, CycleError::Measurement(SensorError::Timeout(_))));
    assert_eq!(err.stage(), StationState::Measuring);
    assert_eq!(err.kind(), "timeout");
    assert!(!rig.primary_file().exists());
    assert_eq!(rig.station.state(), StationState::Idle);

    next_interval(&rig).await;
    let report = rig.station.run_cycle().await.unwrap();
    assert_eq!(report.reading.raw_distance_mm, 1850);
    assert_eq!(report.reading.snow_depth_mm, 150);

    let rows = rig.station.storage().primary().read_all().unwrap();
    assert_eq!(rows, vec![report.reading]);
}

#[tokio::test(start_paused = true)]
async fn radio_outage_is_recorded_local_only_until_link_returns() {
    let mut rig = rig("");
    rig.radio.set_condition(LinkCondition::Down);
    rig.radio.set_latency(Duration::from_secs(4));

    let started = Instant::now();
    let report = rig.station.run_cycle().await.unwrap();
    assert!(started.elapsed() <= Duration::from_secs(10));
    assert_eq!(report.transmission.status, TransmissionStatus::LocalOnly);
    assert_eq!(report.reading.signal_quality, None);

    rig.radio.set_condition(LinkCondition::Up);
    rig.radio.set_latency(Duration::ZERO);
    next_interval(&rig).await;
    rig.station.run_cycle().await.unwrap();
    next_interval(&rig).await;
    rig.station.run_cycle().await.unwrap();

    let statuses: Vec<(TransmissionStatus, Option<u8>)> = rig
        .station
        .storage()
        .primary()
        .read_all()
        .unwrap()
        .iter()
        .map(|r| (r.transmission_status, r.signal_quality))
        .collect();
    assert_eq!(
        statuses,
        [
            (TransmissionStatus::LocalOnly, None),
            (TransmissionStatus::Success, Some(50)),
            (TransmissionStatus::Success, Some(50)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn deferred_backup_replays_in_order_after_remount() {
    let dir = tempfile::tempdir().unwrap();
    let backup = dir.path().join("usb");
    fs::create_dir(&backup).unwrap();
    let mut rig = rig(&format!(
        "backup_storage_path: {}\nbackup_sync_mode: deferred\nbackup_poll_seconds: 1\n",
        backup.display()
    ));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_reachability_poller(
        backup.clone(),
        false,
        Duration::from_secs(1),
        rig.reachability.clone(),
        shutdown_rx,
    );

    let first = rig.station.run_cycle().await.unwrap();
    assert_eq!(first.write.mirror, MirrorState::Pending(1));

    let unmounted = dir.path().join("usb-away");
    fs::rename(&backup, &unmounted).unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!rig.reachability.is_reachable());

    for pending in [2, 3] {
        next_interval(&rig).await;
        let report = rig.station.run_cycle().await.unwrap();
        assert_eq!(report.write.mirror, MirrorState::Degraded { pending });
    }
    assert_eq!(rig.station.storage().primary().read_all().unwrap().len(), 3);

    fs::rename(&unmounted, &backup).unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(rig.reachability.is_reachable());

    next_interval(&rig).await;
    let fourth = rig.station.run_cycle().await.unwrap();
    assert_eq!(fourth.write.mirror, MirrorState::Pending(1));

    let mirror = rig.station.storage().mirror().unwrap().log().clone();
    let replayed = mirror.read_all().unwrap();
    let primary = rig.station.storage().primary().read_all().unwrap();
    assert_eq!(replayed[..], primary[..3]);

    assert_eq!(rig.station.run_once().await.unwrap().write.mirror, MirrorState::Pending(1));
    assert_eq!(
        mirror.read_all().unwrap(),
        rig.station.storage().primary().read_all().unwrap()
    );
}

#[tokio::test(start_paused = true)]
async fn immediate_backup_failure_leaves_primary_intact() {
    let dir = tempfile::tempdir().unwrap();
    let backup = dir.path().join("usb");
    fs::create_dir(&backup).unwrap();
    let mut rig = rig(&format!("backup_storage_path: {}\n", backup.display()));

    let report = rig.station.run_cycle().await.unwrap();
    assert_eq!(report.write.mirror, MirrorState::Synced);

    rig.reachability.set(false);
    next_interval(&rig).await;
    let report = rig.station.run_cycle().await.unwrap();
    assert_eq!(report.write.mirror, MirrorState::Degraded { pending: 1 });
    assert_eq!(report.transmission.status, TransmissionStatus::Success);
    assert_eq!(rig.station.storage().primary().read_all().unwrap().len(), 2);

    rig.reachability.set(true);
    next_interval(&rig).await;
    rig.station.run_cycle().await.unwrap();
    assert_eq!(
        rig.station.storage().mirror().unwrap().log().read_all().unwrap(),
        rig.station.storage().primary().read_all().unwrap()
    );
}

#[tokio::test(start_paused = true)]
async fn diagnostic_row_matches_the_stored_line() {
    let mut rig = rig("");

    let report = rig.station.run_once().await.unwrap();
    let line = format_row(&report.reading);
    assert_eq!(
        line,
        "2024-01-15T14:30:00Z,STN_01,1850,150,-5.2,,50,success"
    );

    let contents = fs::read_to_string(rig.primary_file()).unwrap();
    assert_eq!(contents.lines().nth(1), Some(line.as_str()));
}

#[tokio::test(start_paused = true)]
async fn status_patch_is_idempotent() {
    let mut rig = rig("");
    let report = rig.station.run_cycle().await.unwrap();
    let before = fs::read(rig.primary_file()).unwrap();

    let primary = rig.station.storage().primary().clone();
    let outcome = primary
        .patch(
            &report.reading.timestamp,
            report.transmission.status,
            report.transmission.signal_quality,
        )
        .unwrap();
    assert_eq!(outcome, PatchOutcome::Unchanged);
    assert_eq!(fs::read(rig.primary_file()).unwrap(), before);
}

#[test]
fn placeholder_identity_is_rejected_before_any_hardware() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "");

    let contents = fs::read_to_string(&path).unwrap();
    fs::write(&path, contents.replace("STN_01", "STN_XX")).unwrap();
    let err = config::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
    assert!(err.to_string().contains("placeholder"), "{err}");

    fs::write(
        &path,
        contents
            .replace("latitude: 45.1", "latitude: 0.0")
            .replace("longitude: -111.2", "longitude: 0.0"),
    )
    .unwrap();
    let err = config::load(&path).unwrap_err();
    assert!(err.to_string().contains("0.0/0.0"), "{err}");
}
