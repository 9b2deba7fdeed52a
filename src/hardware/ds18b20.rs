use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use tracing::{debug, warn};

use crate::hardware::{ProbeError, TemperatureProbe};

/// DS18B20 family code prefix under the w1 bus.
const DEVICE_PREFIX: &str = "28-";

const READ_ATTEMPTS: usize = 3;

const RETRY_DELAY: Duration = Duration::from_millis(100);

/// DS18B20 probe read through the kernel's `w1-gpio` overlay.
#[derive(Debug)]
pub struct Ds18b20 {
    device_file: PathBuf,
}

impl Ds18b20 {
    /// Uses the first DS18B20 listed under `devices_dir`.
    pub fn discover(devices_dir: &Path) -> Result<Self, ProbeError> {
        let mut devices: Vec<PathBuf> = fs::read_dir(devices_dir)
            .map_err(|_| ProbeError::NotFound(devices_dir.to_path_buf()))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(DEVICE_PREFIX))
            .map(|entry| entry.path())
            .collect();
        devices.sort();

        let Some(device) = devices.into_iter().next() else {
            return Err(ProbeError::NotFound(devices_dir.to_path_buf()));
        };

        let probe = Self {
            device_file: device.join("w1_slave"),
        };
        debug!(device = ?probe.device_id(), "DS18B20 found");

        Ok(probe)
    }

    /// Bus id such as `28-0123456789ab`.
    pub fn device_id(&self) -> Option<&str> {
        self.device_file
            .parent()
            .and_then(Path::file_name)
            .and_then(|name| name.to_str())
    }
}

impl TemperatureProbe for Ds18b20 {
    fn read_celsius(&mut self) -> Result<f32, ProbeError> {
        // The first conversion after power-up occasionally fails its CRC.
        for attempt in 1..=READ_ATTEMPTS {
            let contents = fs::read_to_string(&self.device_file)?;
            match parse_w1_slave(&contents) {
                Some(celsius) => return Ok(celsius),
                None => {
                    warn!(attempt, "DS18B20 returned an invalid frame");
                    thread::sleep(RETRY_DELAY);
                }
            }
        }

        Err(ProbeError::InvalidReading(READ_ATTEMPTS))
    }
}

/// Parses the two-line `w1_slave` format:
///
/// ```text
/// 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
/// 72 01 4b 46 7f ff 0e 10 57 t=23125
/// ```
fn parse_w1_slave(contents: &str) -> Option<f32> {
    let mut lines = contents.lines();
    let crc_line = lines.next()?;
    if !crc_line.trim_end().ends_with("YES") {
        return None;
    }

    let data_line = lines.next()?;
    let (_, millidegrees) = data_line.split_once("t=")?;
    let millidegrees: i32 = millidegrees.trim().parse().ok()?;

    Some(millidegrees as f32 / 1000.0)
}
