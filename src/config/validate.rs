use std::{
    env,
    fs::{self, OpenOptions},
    io::{self, Write as _},
    path::{Path, PathBuf},
    process,
    time::Duration,
};

use tracing::debug;

use crate::config::{
    Backoff, BackoffKind, ConfigError, ConfigFormat, MeasurementConfig, PLACEHOLDER_STATION_IDS, Pins,
    RESERVED_PINS, RadioConfig, RawConfig, StationConfig, StorageConfig,
};

const DEFAULT_PRIMARY_STORAGE_PATH: &str = "~/snow_data";
const DEFAULT_W1_DEVICES_PATH: &str = "/sys/bus/w1/devices";
const DEFAULT_TEMP_SENSOR_PIN: u8 = 4;
const MAX_BCM_PIN: u8 = 27;

const LORA_BANDWIDTHS_HZ: [u32; 10] = [
    7_800, 10_400, 15_600, 20_800, 31_250, 41_700, 62_500, 125_000, 250_000, 500_000,
];

/// Reads, parses and validates a station configuration file.
pub fn load(path: &Path) -> Result<StationConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    if contents.trim().is_empty() {
        return Err(ConfigError::Empty(path.to_path_buf()));
    }

    let raw = RawConfig::parse(&contents, ConfigFormat::from_path(path))?;
    validate(raw)
}

/// Turns a raw configuration into a [`StationConfig`], collecting every
/// problem found. The primary storage directory is created only once every
/// other check has passed; no hardware is opened.
pub fn validate(raw: RawConfig) -> Result<StationConfig, ConfigError> {
    let mut problems = Vec::new();

    let station_id = raw.station_id.as_deref().map(str::trim).unwrap_or_default();
    if station_id.is_empty() {
        problems.push("station_id cannot be empty".to_string());
    } else if PLACEHOLDER_STATION_IDS
        .iter()
        .any(|p| p.eq_ignore_ascii_case(station_id))
    {
        problems.push(format!(
            "station_id {station_id} is a placeholder and must be unique"
        ));
    } else if !station_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        // Ends up in log file names.
        problems.push(format!(
            "station_id {station_id:?} may only contain letters, digits, '_' and '-'"
        ));
    }

    let latitude = require(raw.latitude, "latitude", &mut problems);
    let longitude = require(raw.longitude, "longitude", &mut problems);
    let elevation_m = require(raw.elevation_m, "elevation_m", &mut problems);
    if let (Some(lat), Some(lon)) = (latitude, longitude) {
        if lat == 0.0 && lon == 0.0 {
            problems.push("latitude/longitude are still the 0.0/0.0 defaults".to_string());
        }
        if !(-90.0..=90.0).contains(&lat) {
            problems.push(format!("latitude {lat} out of range: expected -90 to 90"));
        }
        if !(-180.0..=180.0).contains(&lon) {
            problems.push(format!("longitude {lon} out of range: expected -180 to 180"));
        }
    }

    let min_range_mm = raw.sensor_min_range_mm.unwrap_or(20);
    let max_range_mm = raw.sensor_max_range_mm.unwrap_or(4000);
    if min_range_mm >= max_range_mm {
        problems.push(format!(
            "sensor_min_range_mm {min_range_mm} must be below sensor_max_range_mm {max_range_mm}"
        ));
    }

    let ground_height_mm = require(raw.ground_height_mm, "ground_height_mm", &mut problems);
    if let Some(ground) = ground_height_mm
        && (ground == 0 || ground > max_range_mm)
    {
        problems.push(format!(
            "ground_height_mm {ground} out of range: expected 1 to {max_range_mm}"
        ));
    }

    let pins = validate_pins(&raw, &mut problems);

    let interval_seconds = raw.measurement_interval_seconds.unwrap_or(900);
    if interval_seconds == 0 {
        problems.push("measurement_interval_seconds must be at least 1".to_string());
    }
    let samples_per_reading = raw.samples_per_reading.unwrap_or(5);
    if samples_per_reading == 0 {
        problems.push("samples_per_reading must be at least 1".to_string());
    }

    let storage = validate_storage(&raw, &mut problems);
    let radio = validate_radio(&raw, &mut problems);

    if !problems.is_empty() {
        return Err(ConfigError::Invalid(problems));
    }

    if let Some(storage) = &storage
        && let Err(e) = fs::create_dir_all(&storage.primary_path)
            .and_then(|_| probe_writable(&storage.primary_path))
    {
        return Err(ConfigError::Invalid(vec![format!(
            "primary_storage_path {:?} is not writable: {e}",
            storage.primary_path
        )]));
    }

    let (
        Some(latitude),
        Some(longitude),
        Some(elevation_m),
        Some(ground_height_mm),
        Some(pins),
        Some(storage),
        Some(radio),
    ) = (
        latitude,
        longitude,
        elevation_m,
        ground_height_mm,
        pins,
        storage,
        radio,
    )
    else {
        return Err(ConfigError::Invalid(vec![
            "incomplete configuration".to_string(),
        ]));
    };

    let config = StationConfig {
        station_id: station_id.to_string(),
        latitude,
        longitude,
        elevation_m,
        ground_height_mm,
        pins,
        measurement: MeasurementConfig {
            interval: Duration::from_secs(interval_seconds),
            samples_per_reading,
            min_range_mm,
            max_range_mm,
            echo_timeout: Duration::from_millis(raw.echo_timeout_ms.unwrap_or(40)),
            fallback_temperature_c: raw.fallback_temperature_c,
            w1_devices_path: expand_home(
                raw.w1_devices_path
                    .as_deref()
                    .unwrap_or(DEFAULT_W1_DEVICES_PATH),
            ),
            battery_voltage_path: raw.battery_voltage_path.as_deref().map(expand_home),
        },
        storage,
        radio,
        install_date: raw.install_date,
        notes: raw.notes,
    };

    debug!(station_id = %config.station_id, "configuration validated");

    Ok(config)
}

fn require<T>(value: Option<T>, name: &str, problems: &mut Vec<String>) -> Option<T> {
    if value.is_none() {
        problems.push(format!("missing required field: {name}"));
    }
    value
}

fn validate_pins(raw: &RawConfig, problems: &mut Vec<String>) -> Option<Pins> {
    let trigger = require(raw.trigger_pin, "trigger_pin", problems);
    let echo = require(raw.echo_pin, "echo_pin", problems);
    let temperature = if raw.temp_sensor_enabled.unwrap_or(true) {
        Some(raw.temp_sensor_pin.unwrap_or(DEFAULT_TEMP_SENSOR_PIN))
    } else {
        None
    };

    let named = [
        ("trigger_pin", trigger),
        ("echo_pin", echo),
        ("temp_sensor_pin", temperature),
    ];
    for (i, (name, pin)) in named.iter().enumerate() {
        let Some(pin) = *pin else {
            continue;
        };
        if pin > MAX_BCM_PIN {
            problems.push(format!(
                "{name} {pin} out of range: expected BCM 0 to {MAX_BCM_PIN}"
            ));
        }
        if RESERVED_PINS.contains(&pin) {
            problems.push(format!(
                "{name} {pin} conflicts with pins reserved for the LoRa radio bonnet"
            ));
        }
        for (other_name, other_pin) in &named[..i] {
            if *other_pin == Some(pin) {
                problems.push(format!("{name} {pin} is already used by {other_name}"));
            }
        }
    }

    Some(Pins {
        trigger: trigger?,
        echo: echo?,
        temperature,
    })
}

fn validate_storage(raw: &RawConfig, problems: &mut Vec<String>) -> Option<StorageConfig> {
    let primary_path = expand_home(
        raw.primary_storage_path
            .as_deref()
            .or(raw.local_storage_path.as_deref())
            .unwrap_or(DEFAULT_PRIMARY_STORAGE_PATH),
    );

    // Not created yet; the closest existing ancestor has to accept writes.
    let existing = primary_path
        .ancestors()
        .find(|p| p.is_dir())
        .unwrap_or(Path::new("."));
    if let Err(e) = probe_writable(existing) {
        problems.push(format!(
            "primary_storage_path {primary_path:?} is not writable: {e}"
        ));
    }

    let backup_path = raw.backup_storage_path.as_deref().map(expand_home);
    let backup_required = raw.backup_required.unwrap_or(false);
    if backup_required {
        match &backup_path {
            None => problems.push(
                "backup_required is set but no backup_storage_path is configured".to_string(),
            ),
            Some(path) => {
                if let Err(e) = probe_writable(path) {
                    problems.push(format!(
                        "backup_storage_path {path:?} is not writable: {e}"
                    ));
                }
            }
        }
    }
    if let Some(path) = &backup_path
        && *path == primary_path
    {
        problems.push("backup_storage_path must differ from primary_storage_path".to_string());
    }

    let backup_queue_capacity = raw.backup_queue_capacity.unwrap_or(1024);
    if backup_queue_capacity == 0 {
        problems.push("backup_queue_capacity must be at least 1".to_string());
    }
    let max_files = raw.max_local_files.unwrap_or(30);
    if max_files == 0 {
        problems.push("max_local_files must be at least 1".to_string());
    }

    Some(StorageConfig {
        primary_path,
        backup_path,
        backup_sync_mode: raw.backup_sync_mode.unwrap_or_default(),
        backup_required,
        backup_require_mount: raw.backup_require_mount.unwrap_or(false),
        backup_queue_capacity,
        backup_poll_interval: Duration::from_secs(raw.backup_poll_seconds.unwrap_or(30).max(1)),
        max_files,
    })
}

fn validate_radio(raw: &RawConfig, problems: &mut Vec<String>) -> Option<RadioConfig> {
    let frequency_mhz = raw.lora_frequency.unwrap_or(915.0);
    if !(860.0..=1020.0).contains(&frequency_mhz) {
        problems.push(format!(
            "lora_frequency {frequency_mhz} out of range: expected 860 to 1020 MHz"
        ));
    }

    let spreading_factor = raw.lora_spreading_factor.unwrap_or(7);
    if !(6..=12).contains(&spreading_factor) {
        problems.push(format!(
            "lora_spreading_factor {spreading_factor} out of range: expected 6 to 12"
        ));
    }

    let bandwidth_hz = raw.lora_bandwidth.unwrap_or(125_000);
    if !LORA_BANDWIDTHS_HZ.contains(&bandwidth_hz) {
        problems.push(format!("lora_bandwidth {bandwidth_hz} is not a LoRa bandwidth"));
    }

    let tx_power_dbm = raw.lora_tx_power.unwrap_or(23);
    if !(5..=23).contains(&tx_power_dbm) {
        problems.push(format!(
            "lora_tx_power {tx_power_dbm} out of range: expected 5 to 23 dBm"
        ));
    }

    let station_address = raw.station_address.unwrap_or(1);
    let base_station_address = raw.base_station_address.unwrap_or(0);
    if station_address == base_station_address {
        problems.push(format!(
            "station_address and base_station_address must be different (both {station_address})"
        ));
    }

    let max_attempts = raw.tx_max_attempts.unwrap_or(3);
    if max_attempts == 0 {
        problems.push("tx_max_attempts must be at least 1".to_string());
    }

    let delay = Duration::from_millis(raw.tx_backoff_ms.unwrap_or(500));
    let backoff = match raw.tx_backoff.unwrap_or_default() {
        BackoffKind::Fixed => Backoff::Fixed(delay),
        BackoffKind::Exponential => Backoff::Exponential {
            initial: delay,
            max: Duration::from_millis(raw.tx_backoff_max_ms.unwrap_or(4000)).max(delay),
        },
    };

    let window_seconds = raw.tx_window_seconds.unwrap_or(10);
    if window_seconds == 0 {
        problems.push("tx_window_seconds must be at least 1".to_string());
    }

    Some(RadioConfig {
        frequency_mhz,
        spreading_factor,
        bandwidth_hz,
        tx_power_dbm,
        station_address,
        base_station_address,
        max_attempts,
        backoff,
        transmission_window: Duration::from_secs(window_seconds),
    })
}

/// Creates and removes a scratch file to prove `dir` accepts writes.
pub fn probe_writable(dir: &Path) -> io::Result<()> {
    if !dir.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "not an existing directory",
        ));
    }

    let probe = dir.join(format!(".snow-station-probe-{}", process::id()));
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&probe)?;
    file.write_all(b"probe")?;
    file.sync_all()?;
    drop(file);
    fs::remove_file(&probe)
}

fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some("") => "",
        Some(rest) if rest.starts_with('/') => &rest[1..],
        _ => return PathBuf::from(path),
    };

    match env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackupSyncMode;

    fn base_yaml(storage: &Path) -> String {
        format!(
            r#"
station_id: STN_01
latitude: 45.1
longitude: -111.2
elevation_m: 1200
ground_height_mm: 2000
trigger_pin: 23
echo_pin: 24
measurement_interval_seconds: 900
lora_frequency: 915.0
primary_storage_path: {}
"#,
            storage.display()
        )
    }

    fn validate_str(s: &str) -> Result<StationConfig, ConfigError> {
        validate(RawConfig::from_yaml_str(s).unwrap())
    }

    #[test]
    fn test_defaults_applied() {
        let dir = tempfile::tempdir().unwrap();
        let config = validate_str(&base_yaml(dir.path())).unwrap();

        assert_eq!(config.station_id, "STN_01");
        assert_eq!(config.elevation_m, 1200.0);
        assert_eq!(config.measurement.samples_per_reading, 5);
        assert_eq!(config.measurement.interval, Duration::from_secs(900));
        assert_eq!(config.pins.temperature, Some(4));
        assert_eq!(config.storage.primary_path, dir.path());
        assert_eq!(config.storage.backup_path, None);
        assert_eq!(config.storage.backup_sync_mode, BackupSyncMode::Immediate);
        assert!(!config.storage.backup_required);
        assert_eq!(config.radio.backoff, Backoff::Fixed(Duration::from_millis(500)));
    }

    #[test]
    fn test_legacy_storage_path_maps_to_primary() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = base_yaml(dir.path()).replace("primary_storage_path", "local_storage_path");

        let config = validate_str(&yaml).unwrap();
        assert_eq!(config.storage.primary_path, dir.path());
    }

    #[test]
    fn test_primary_wins_over_legacy_path() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = dir.path().join("legacy");
        let yaml = format!(
            "{}local_storage_path: {}\n",
            base_yaml(dir.path()),
            legacy.display()
        );

        let config = validate_str(&yaml).unwrap();
        assert_eq!(config.storage.primary_path, dir.path());
        assert!(!legacy.exists());
    }

    #[test]
    fn test_rejects_placeholder_station_id() {
        let dir = tempfile::tempdir().unwrap();
        for placeholder in ["STN_XX", "stn_xx", "TEMPLATE", "CHANGE_ME"] {
            let yaml = base_yaml(dir.path()).replace("STN_01", placeholder);
            let err = validate_str(&yaml).unwrap_err();
            assert!(
                err.problems().iter().any(|p| p.contains("placeholder")),
                "{placeholder}: {err}"
            );
        }
    }

    #[test]
    fn test_rejected_config_creates_no_storage_directory() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("snow_data");
        let yaml = base_yaml(&primary).replace("STN_01", "STN_XX");

        validate_str(&yaml).unwrap_err();
        assert!(!primary.exists());

        validate_str(&base_yaml(&primary)).unwrap();
        assert!(primary.is_dir());
    }

    #[test]
    fn test_rejects_station_id_unfit_for_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = base_yaml(dir.path()).replace("STN_01", "north/ridge");

        let err = validate_str(&yaml).unwrap_err();
        assert!(err.problems().iter().any(|p| p.contains("may only contain")));
    }

    #[test]
    fn test_rejects_null_island() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = base_yaml(dir.path())
            .replace("latitude: 45.1", "latitude: 0.0")
            .replace("longitude: -111.2", "longitude: 0.0");

        let err = validate_str(&yaml).unwrap_err();
        assert!(err.problems().iter().any(|p| p.contains("defaults")));
    }

    #[test]
    fn test_rejects_reserved_and_duplicate_pins() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!(
            "{}temp_sensor_enabled: true\ntemp_sensor_pin: 3\n",
            base_yaml(dir.path()).replace("trigger_pin: 23", "trigger_pin: 7")
        );

        let err = validate_str(&yaml).unwrap_err();
        let problems = err.problems();
        assert!(problems.iter().any(|p| p.contains("trigger_pin 7 conflicts")));
        assert!(problems.iter().any(|p| p.contains("temp_sensor_pin 3 conflicts")));

        let yaml = base_yaml(dir.path()).replace("echo_pin: 24", "echo_pin: 23");
        let err = validate_str(&yaml).unwrap_err();
        assert!(
            err.problems()
                .iter()
                .any(|p| p.contains("echo_pin 23 is already used by trigger_pin"))
        );
    }

    #[test]
    fn test_disabled_probe_frees_its_pin() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!("{}temp_sensor_enabled: false\n", base_yaml(dir.path()));

        let config = validate_str(&yaml).unwrap();
        assert_eq!(config.pins.temperature, None);
    }

    #[test]
    fn test_rejects_equal_radio_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!(
            "{}base_station_address: 1\nstation_address: 1\n",
            base_yaml(dir.path())
        );

        let err = validate_str(&yaml).unwrap_err();
        assert!(err.problems().iter().any(|p| p.contains("must be different")));
    }

    #[test]
    fn test_collects_every_problem() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate(RawConfig {
            primary_storage_path: Some(dir.path().display().to_string()),
            ..RawConfig::default()
        })
        .unwrap_err();
        let problems = err.problems();
        for field in ["latitude", "longitude", "elevation_m", "ground_height_mm"] {
            assert!(
                problems.iter().any(|p| p.ends_with(field)),
                "missing {field}: {problems:?}"
            );
        }
        assert!(problems.iter().any(|p| p.contains("station_id")));
    }

    #[test]
    fn test_required_backup_must_be_writable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("usb");
        let yaml = format!(
            "{}backup_storage_path: {}\nbackup_required: true\n",
            base_yaml(&dir.path().join("primary")),
            missing.display()
        );

        let err = validate_str(&yaml).unwrap_err();
        assert!(
            err.problems()
                .iter()
                .any(|p| p.contains("backup_storage_path"))
        );

        fs::create_dir(&missing).unwrap();
        let config = validate_str(&yaml).unwrap();
        assert_eq!(config.storage.backup_path, Some(missing));
    }

    #[test]
    fn test_optional_backup_may_be_absent() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!(
            "{}backup_storage_path: {}\nbackup_sync_mode: deferred\n",
            base_yaml(&dir.path().join("primary")),
            dir.path().join("usb").display()
        );

        let config = validate_str(&yaml).unwrap();
        assert_eq!(config.storage.backup_sync_mode, BackupSyncMode::Deferred);
    }

    #[test]
    fn test_load_reads_provisioned_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("station_01.yaml");
        let storage = dir.path().join("legacy_snow_data");
        fs::write(
            &path,
            base_yaml(&storage).replace("primary_storage_path", "local_storage_path"),
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.station_id, "STN_01");
        assert_eq!(config.storage.primary_path, storage);
    }

    #[test]
    fn test_load_reads_toml_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("station.toml");
        fs::write(
            &path,
            format!(
                r#"
station_id = "STN_01"
latitude = 45.1
longitude = -111.2
elevation_m = 1200
ground_height_mm = 2000
trigger_pin = 23
echo_pin = 24
primary_storage_path = "{}"
"#,
                dir.path().display()
            ),
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.storage.primary_path, dir.path());
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")), ConfigFormat::Yaml);

        let yaml = dir.path().join("station.yaml");
        fs::copy(&path, &yaml).unwrap();
        assert!(matches!(load(&yaml), Err(ConfigError::ParseYaml(_))));
    }

    #[test]
    fn test_load_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.yaml");
        fs::write(&path, "\n  \n").unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Empty(_)));
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_expand_home() {
        let Some(home) = env::var_os("HOME") else {
            return;
        };
        assert_eq!(expand_home("~/snow_data"), PathBuf::from(&home).join("snow_data"));
        assert_eq!(expand_home("/data"), PathBuf::from("/data"));
        assert_eq!(expand_home("~other/data"), PathBuf::from("~other/data"));
    }
}
