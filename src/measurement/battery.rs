use std::{fs, path::Path};

use tracing::debug;

/// Reads a battery voltage from a sysfs-style file.
///
/// Power-supply class files report microvolts; plain values below 1000 are
/// taken as volts. Unreadable or unparsable files yield `None`.
pub fn read_battery_voltage(path: &Path) -> Option<f32> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            debug!(?path, error = %e, "battery voltage unavailable");
            return None;
        }
    };

    let value: f64 = contents.trim().parse().ok()?;
    let volts = if value > 1000.0 { value / 1_000_000.0 } else { value };

    Some(((volts * 100.0).round() / 100.0) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_microvolts_and_volts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voltage_now");

        fs::write(&path, "12456000\n").unwrap();
        assert_eq!(read_battery_voltage(&path), Some(12.46));

        fs::write(&path, "3.7").unwrap();
        assert_eq!(read_battery_voltage(&path), Some(3.7));

        fs::write(&path, "n/a").unwrap();
        assert_eq!(read_battery_voltage(&path), None);
    }

    #[test]
    fn test_missing_file() {
        assert_eq!(read_battery_voltage(Path::new("/nonexistent/voltage_now")), None);
    }
}
