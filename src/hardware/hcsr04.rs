use std::{
    hint, thread,
    time::{Duration, Instant},
};

use rppal::gpio::{Gpio, InputPin, OutputPin};
use tracing::debug;

use crate::hardware::{RangeSensor, SensorError};

/// Minimum trigger pulse width from the HC-SR04 datasheet.
const TRIGGER_PULSE: Duration = Duration::from_micros(10);

const SETTLE_TIME: Duration = Duration::from_millis(500);

/// HC-SR04 ultrasonic sensor on two GPIO lines.
///
/// Pulse widths are timed by busy-waiting on the echo line, which keeps the
/// jitter in the low microseconds on an otherwise idle Pi.
pub struct Hcsr04 {
    trigger: OutputPin,
    echo: InputPin,
}

impl Hcsr04 {
    pub fn new(trigger_pin: u8, echo_pin: u8) -> Result<Self, SensorError> {
        let gpio = Gpio::new().map_err(|e| SensorError::Gpio(e.to_string()))?;
        let trigger = gpio
            .get(trigger_pin)
            .map_err(|e| SensorError::Gpio(format!("trigger pin {trigger_pin}: {e}")))?
            .into_output_low();
        let echo = gpio
            .get(echo_pin)
            .map_err(|e| SensorError::Gpio(format!("echo pin {echo_pin}: {e}")))?
            .into_input();

        thread::sleep(SETTLE_TIME);
        debug!(trigger_pin, echo_pin, "HC-SR04 initialized");

        Ok(Self { trigger, echo })
    }

    fn wait_while(&self, level_high: bool, timeout: Duration) -> Result<Instant, SensorError> {
        let start = Instant::now();
        while self.echo.is_high() == level_high {
            if start.elapsed() > timeout {
                return Err(SensorError::Timeout(timeout));
            }
            hint::spin_loop();
        }
        Ok(Instant::now())
    }
}

impl RangeSensor for Hcsr04 {
    fn ping(&mut self, timeout: Duration) -> Result<Duration, SensorError> {
        // A previous echo that never ended would otherwise read as an instant rise.
        self.wait_while(true, timeout)?;

        self.trigger.set_high();
        let start = Instant::now();
        while start.elapsed() < TRIGGER_PULSE {
            hint::spin_loop();
        }
        self.trigger.set_low();

        let rise = self.wait_while(false, timeout)?;
        let fall = self.wait_while(true, timeout)?;

        Ok(fall - rise)
    }
}
