use std::time::Duration;

/// Speed of sound used when no temperature is known, m/s.
pub const UNCOMPENSATED_SPEED_OF_SOUND_MPS: f64 = 343.0;

const SPEED_OF_SOUND_AT_0C_MPS: f64 = 331.3;
const SPEED_OF_SOUND_PER_DEGREE_MPS: f64 = 0.606;

/// Linear approximation of the speed of sound in dry air around 0 °C.
pub fn speed_of_sound_mps(air_temp_c: Option<f32>) -> f64 {
    match air_temp_c {
        Some(t) => SPEED_OF_SOUND_AT_0C_MPS + SPEED_OF_SOUND_PER_DEGREE_MPS * f64::from(t),
        None => UNCOMPENSATED_SPEED_OF_SOUND_MPS,
    }
}

/// One-way distance for a round-trip echo.
pub fn echo_to_distance_mm(echo: Duration, speed_of_sound_mps: f64) -> f64 {
    echo.as_secs_f64() * speed_of_sound_mps * 1000.0 / 2.0
}
