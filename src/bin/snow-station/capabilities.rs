use anyhow::{Context as _, Result};
use snow_station::{
    config::StationConfig,
    hardware::{
        AbsentProbe, AbsentRadio, Ds18b20, Hcsr04, LinkCondition, RadioLink, RangeSensor, Rfm95,
        SimulatedProbe, SimulatedRadio, SimulatedRangeSensor, TemperatureProbe,
    },
};
use tracing::{info, warn};

const SIMULATED_SNOW_MM: u32 = 150;
const SIMULATED_AIR_TEMP_C: f32 = -5.0;

pub struct Capabilities {
    pub sensor: Box<dyn RangeSensor>,
    pub probe: Box<dyn TemperatureProbe>,
    pub radio: Box<dyn RadioLink>,
}

impl Capabilities {
    /// Opens the Pi's hardware. Only the ranging sensor is mandatory; a
    /// missing probe or radio degrades the station instead of stopping it.
    pub fn real(config: &StationConfig) -> Result<Self> {
        let sensor = Hcsr04::new(config.pins.trigger, config.pins.echo)
            .context("failed to initialize HC-SR04 ranging sensor")?;

        let probe: Box<dyn TemperatureProbe> = match config.pins.temperature {
            None => {
                info!("temperature probe disabled");
                Box::new(AbsentProbe)
            }
            Some(pin) => match Ds18b20::discover(&config.measurement.w1_devices_path) {
                Ok(probe) => {
                    info!(pin, device = ?probe.device_id(), "DS18B20 temperature probe ready");
                    Box::new(probe)
                }
                Err(e) => {
                    warn!(pin, error = %e, "DS18B20 unavailable, measuring without it");
                    Box::new(AbsentProbe)
                }
            },
        };

        let radio: Box<dyn RadioLink> = match Rfm95::new(&config.radio) {
            Ok(radio) => Box::new(radio),
            Err(e) => {
                warn!(error = %e, "LoRa radio unavailable, readings will stay local");
                Box::new(AbsentRadio::new(e.to_string()))
            }
        };

        Ok(Self {
            sensor: Box::new(sensor),
            probe,
            radio,
        })
    }

    /// A steady scene: a little snow on the ground, cold air, radio in range.
    pub fn simulated(config: &StationConfig) -> Self {
        let distance_mm = config
            .ground_height_mm
            .saturating_sub(SIMULATED_SNOW_MM)
            .max(config.measurement.min_range_mm);

        Self {
            sensor: Box::new(SimulatedRangeSensor::new(
                f64::from(distance_mm),
                SIMULATED_AIR_TEMP_C,
            )),
            probe: Box::new(SimulatedProbe::new(Some(SIMULATED_AIR_TEMP_C))),
            radio: Box::new(SimulatedRadio::new(LinkCondition::Up)),
        }
    }
}
