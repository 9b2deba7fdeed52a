use crate::reading::Reading;

/// Renders the compact radio message the base station parses:
/// `station_id,timestamp,raw_distance_mm,snow_depth_mm,temp_c,battery_v`,
/// with `-` for an absent temperature or voltage.
pub fn format_message(reading: &Reading) -> String {
    let temp = match reading.sensor_temp_c {
        Some(t) => format!("{t:.1}"),
        None => "-".to_string(),
    };
    let battery = match reading.battery_voltage {
        Some(v) => format!("{v:.2}"),
        None => "-".to_string(),
    };

    format!(
        "{},{},{},{},{},{}",
        reading.station_id,
        reading.formatted_timestamp(),
        reading.raw_distance_mm,
        reading.snow_depth_mm,
        temp,
        battery,
    )
}
