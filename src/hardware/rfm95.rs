//! RFM95 LoRa driver for the Adafruit LoRa Radio Bonnet.
//!
//! | Bonnet line | Pi pin              |
//! |-------------|---------------------|
//! | NSS         | CE1 (GPIO 7)        |
//! | SCK/MOSI/MISO | SPI0 (GPIO 11/10/9) |
//! | RESET       | GPIO 25             |
//!
//! DIO0 is not wired to the Pi on the bonnet, so TX completion is detected
//! by polling the IRQ flags register.
//!
//! Packets carry the 4-byte RadioHead header (`to`, `from`, `id`, `flags`)
//! that the base station's receiver expects in front of the payload.

use std::{thread, time::Duration};

use async_trait::async_trait;
use rppal::{
    gpio::{Gpio, OutputPin},
    spi::{Bus, Mode, SlaveSelect, Spi},
};
use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::{
    config::RadioConfig,
    hardware::{LinkReport, RadioError, RadioLink},
};

mod regs {
    pub const FIFO: u8 = 0x00;
    pub const OP_MODE: u8 = 0x01;
    pub const FR_MSB: u8 = 0x06;
    pub const FR_MID: u8 = 0x07;
    pub const FR_LSB: u8 = 0x08;
    pub const PA_CONFIG: u8 = 0x09;
    pub const LNA: u8 = 0x0C;
    pub const FIFO_ADDR_PTR: u8 = 0x0D;
    pub const FIFO_TX_BASE_ADDR: u8 = 0x0E;
    pub const FIFO_RX_BASE_ADDR: u8 = 0x0F;
    pub const IRQ_FLAGS: u8 = 0x12;
    pub const PKT_RSSI_VALUE: u8 = 0x1A;
    pub const MODEM_CONFIG1: u8 = 0x1D;
    pub const MODEM_CONFIG2: u8 = 0x1E;
    pub const PAYLOAD_LENGTH: u8 = 0x22;
    pub const MODEM_CONFIG3: u8 = 0x26;
    pub const DIO_MAPPING1: u8 = 0x40;
    pub const VERSION: u8 = 0x42;
    pub const PA_DAC: u8 = 0x4D;
}

const IRQ_TX_DONE: u8 = 0x08;

const MODE_SLEEP: u8 = 0x00;
const MODE_STDBY: u8 = 0x01;
const MODE_TX: u8 = 0x03;
const MODE_LONG_RANGE: u8 = 0x80;

const PA_BOOST: u8 = 0x80;

const RFM95_VERSION: u8 = 0x12;

const FXOSC: u64 = 32_000_000;

const RESET_PIN: u8 = 25;
const SPI_CLOCK_HZ: u32 = 5_000_000;

const HEADER_LEN: usize = 4;
const MAX_PAYLOAD: usize = 255 - HEADER_LEN;

/// Upper bound on a single packet's time on air at SF12/BW125.
const TX_TIMEOUT: Duration = Duration::from_secs(3);
const TX_POLL_INTERVAL: Duration = Duration::from_millis(5);

const BANDWIDTHS_HZ: [u32; 10] = [
    7_800, 10_400, 15_600, 20_800, 31_250, 41_700, 62_500, 125_000, 250_000, 500_000,
];

pub struct Rfm95 {
    spi: Spi,
    _reset: OutputPin,
    node: u8,
    destination: u8,
    sequence: u8,
}

impl Rfm95 {
    /// Resets the module, checks its version register and applies `config`.
    ///
    /// Any failure here means the radio is absent or miswired; callers fall
    /// back to [`AbsentRadio`](crate::hardware::AbsentRadio).
    pub fn new(config: &RadioConfig) -> Result<Self, RadioError> {
        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss1, SPI_CLOCK_HZ, Mode::Mode0)
            .map_err(|e| RadioError::Unavailable(format!("SPI0/CE1: {e}")))?;
        let mut reset = Gpio::new()
            .and_then(|gpio| gpio.get(RESET_PIN))
            .map_err(|e| RadioError::Unavailable(format!("reset pin {RESET_PIN}: {e}")))?
            .into_output_high();

        reset.set_low();
        thread::sleep(Duration::from_micros(100));
        reset.set_high();
        thread::sleep(Duration::from_millis(5));

        let mut radio = Self {
            spi,
            _reset: reset,
            node: config.station_address,
            destination: config.base_station_address,
            sequence: 0,
        };

        let version = radio.read_reg(regs::VERSION)?;
        if version != RFM95_VERSION {
            return Err(RadioError::InvalidVersion(version));
        }

        radio.write_reg(regs::OP_MODE, MODE_SLEEP)?;
        thread::sleep(Duration::from_millis(10));
        radio.write_reg(regs::OP_MODE, MODE_SLEEP | MODE_LONG_RANGE)?;
        thread::sleep(Duration::from_millis(10));

        radio.write_reg(regs::FIFO_TX_BASE_ADDR, 0x00)?;
        radio.write_reg(regs::FIFO_RX_BASE_ADDR, 0x00)?;
        radio.write_reg(regs::LNA, 0x23)?;
        radio.apply_config(config)?;
        radio.write_reg(regs::OP_MODE, MODE_LONG_RANGE | MODE_STDBY)?;

        debug!(
            frequency_mhz = config.frequency_mhz,
            spreading_factor = config.spreading_factor,
            tx_power_dbm = config.tx_power_dbm,
            "RFM95 initialized"
        );

        Ok(radio)
    }

    fn apply_config(&mut self, config: &RadioConfig) -> Result<(), RadioError> {
        let frf = ((config.frequency_mhz * 1_000_000.0) as u64) * (1 << 19) / FXOSC;
        self.write_reg(regs::FR_MSB, (frf >> 16) as u8)?;
        self.write_reg(regs::FR_MID, (frf >> 8) as u8)?;
        self.write_reg(regs::FR_LSB, frf as u8)?;

        let bw = BANDWIDTHS_HZ
            .iter()
            .position(|&bw| bw == config.bandwidth_hz)
            .unwrap_or(7) as u8;
        // Coding rate 4/5, explicit header.
        self.write_reg(regs::MODEM_CONFIG1, (bw << 4) | (1 << 1))?;

        let sf = config.spreading_factor;
        // CRC on.
        self.write_reg(regs::MODEM_CONFIG2, (sf << 4) | 0x04)?;

        // Low data rate optimisation is mandatory once a symbol exceeds 16 ms.
        let symbol_us = (1u64 << sf) * 1_000_000 / u64::from(config.bandwidth_hz);
        let ldro = if symbol_us > 16_000 { 0x08 } else { 0x00 };
        self.write_reg(regs::MODEM_CONFIG3, ldro | 0x04)?;

        let (pa_config, pa_dac) = match config.tx_power_dbm {
            p if p > 20 => (PA_BOOST | ((p - 8) as u8 & 0x0F), 0x87u8),
            p => (PA_BOOST | ((p - 5) as u8 & 0x0F), 0x84u8),
        };
        self.write_reg(regs::PA_DAC, pa_dac)?;
        self.write_reg(regs::PA_CONFIG, pa_config)?;

        Ok(())
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), RadioError> {
        self.spi
            .write(&[reg | 0x80, value])
            .map(|_| ())
            .map_err(|e| RadioError::Bus(e.to_string()))
    }

    fn read_reg(&mut self, reg: u8) -> Result<u8, RadioError> {
        let mut read = [0u8; 2];
        self.spi
            .transfer(&mut read, &[reg & 0x7F, 0x00])
            .map_err(|e| RadioError::Bus(e.to_string()))?;
        Ok(read[1])
    }

    fn write_fifo(&mut self, packet: &[u8]) -> Result<(), RadioError> {
        let mut buf = Vec::with_capacity(packet.len() + 1);
        buf.push(regs::FIFO | 0x80);
        buf.extend_from_slice(packet);
        self.spi
            .write(&buf)
            .map(|_| ())
            .map_err(|e| RadioError::Bus(e.to_string()))
    }

    fn last_rssi(&mut self) -> Result<Option<i16>, RadioError> {
        let raw = self.read_reg(regs::PKT_RSSI_VALUE)?;
        // HF port: RSSI = -157 + raw. Zero means nothing has been received yet.
        Ok((raw != 0).then(|| -157 + i16::from(raw)))
    }
}

#[async_trait]
impl RadioLink for Rfm95 {
    async fn transmit(&mut self, payload: &[u8]) -> Result<LinkReport, RadioError> {
        let len = HEADER_LEN + payload.len();
        if payload.len() > MAX_PAYLOAD {
            return Err(RadioError::PacketTooLarge(payload.len()));
        }

        let mut packet = Vec::with_capacity(len);
        packet.extend_from_slice(&[self.destination, self.node, self.sequence, 0x00]);
        packet.extend_from_slice(payload);

        self.write_reg(regs::OP_MODE, MODE_LONG_RANGE | MODE_STDBY)?;
        self.write_reg(regs::FIFO_ADDR_PTR, 0x00)?;
        self.write_fifo(&packet)?;
        self.write_reg(regs::PAYLOAD_LENGTH, len as u8)?;
        self.write_reg(regs::DIO_MAPPING1, 0x40)?;
        self.write_reg(regs::IRQ_FLAGS, 0xFF)?;
        self.write_reg(regs::OP_MODE, MODE_LONG_RANGE | MODE_TX)?;

        let deadline = Instant::now() + TX_TIMEOUT;
        loop {
            let irq = self.read_reg(regs::IRQ_FLAGS)?;
            if irq & IRQ_TX_DONE != 0 {
                break;
            }
            if Instant::now() >= deadline {
                self.write_reg(regs::OP_MODE, MODE_LONG_RANGE | MODE_STDBY)?;
                return Err(RadioError::Timeout(TX_TIMEOUT));
            }
            sleep(TX_POLL_INTERVAL).await;
        }

        self.write_reg(regs::IRQ_FLAGS, 0xFF)?;
        self.write_reg(regs::OP_MODE, MODE_LONG_RANGE | MODE_STDBY)?;
        self.sequence = self.sequence.wrapping_add(1);

        Ok(LinkReport {
            rssi_dbm: self.last_rssi()?,
        })
    }
}
