//! Si7005 humidity and temperature sensor attached to a board port.
//!
//! A measurement clears the configuration register, starts a conversion,
//! polls the status register until the conversion finished and reads the
//! two data registers.
//! Only the status poll is retried; every other failure aborts the
//! measurement and is reported with the [`Step`] it occurred in.

use std::{fmt, sync::Arc, time::Duration};
use tokio::time::sleep;

use crate::{bridge::I2cBridge, packet::XferStatus, transport::Transport, Error, ProtocolError, Result, Step};

/// Status register.
pub const REG_STATUS: u8 = 0x00;
/// High data byte; the low byte follows at the next address.
pub const REG_DATA: u8 = 0x01;
/// Configuration register.
pub const REG_CONFIG: u8 = 0x03;
/// Identity register.
pub const REG_ID: u8 = 0x11;

/// Status bit set while a conversion is running.
pub const STATUS_NOT_READY: u8 = 0x01;

/// Configuration bit starting a conversion.
pub const CONFIG_START: u8 = 0x01;
/// Configuration bit enabling the heater.
pub const CONFIG_HEAT: u8 = 0x02;
/// Configuration bit selecting temperature instead of humidity.
pub const CONFIG_TEMP: u8 = 0x10;
/// Configuration bit selecting fast conversion.
pub const CONFIG_FAST: u8 = 0x20;

/// Addresses at which the board exposes sensors.
pub const SENSOR_ADDRESSES: [u8; 4] = [0x40, 0x41, 0x42, 0x43];

/// Status polling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Maximum number of status reads; zero is treated as one.
    pub max_attempts: u32,
    /// Wait between two status reads.
    pub interval: Duration,
}

impl PollConfig {
    /// Default maximum number of status reads.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;
    /// Default wait between two status reads.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(10);

    /// Creates a polling policy.
    ///
    /// At least one status read is performed, even if `max_attempts` is zero.
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        let max_attempts = if max_attempts == 0 { 1 } else { max_attempts };
        Self { max_attempts, interval }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS, Self::DEFAULT_INTERVAL)
    }
}

/// Sensor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorConfig {
    /// Use fast conversion at reduced resolution.
    pub fast_conversion: bool,
    /// Keep the heater on.
    pub heater: bool,
    /// Status polling policy.
    pub poll: PollConfig,
}

impl SensorConfig {
    /// Sets fast conversion.
    pub const fn with_fast_conversion(mut self, fast_conversion: bool) -> Self {
        self.fast_conversion = fast_conversion;
        self
    }

    /// Sets the heater.
    pub const fn with_heater(mut self, heater: bool) -> Self {
        self.heater = heater;
        self
    }

    /// Sets the status polling policy.
    pub const fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Configuration register value without an active conversion.
    fn idle(&self) -> u8 {
        if self.heater {
            CONFIG_HEAT
        } else {
            0
        }
    }
}

/// Physical quantity measured by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    /// Temperature in °C.
    Temperature,
    /// Relative humidity in %RH.
    Humidity,
}

impl Quantity {
    fn start_bits(self) -> u8 {
        match self {
            Self::Temperature => CONFIG_START | CONFIG_TEMP,
            Self::Humidity => CONFIG_START,
        }
    }

    /// Shift of the high and low data byte.
    fn shifts(self) -> (u32, u32) {
        match self {
            Self::Temperature => (6, 2),
            Self::Humidity => (4, 4),
        }
    }

    /// Raw counts per unit.
    fn scale(self) -> i32 {
        match self {
            Self::Temperature => 32,
            Self::Humidity => 16,
        }
    }

    fn offset(self) -> i32 {
        match self {
            Self::Temperature => 50,
            Self::Humidity => 24,
        }
    }

    /// Unit symbol.
    pub fn unit(self) -> &'static str {
        match self {
            Self::Temperature => "°C",
            Self::Humidity => "%RH",
        }
    }

    /// Combines the two data register bytes into the raw reading.
    pub fn raw(self, high: u8, low: u8) -> u16 {
        let (high_shift, low_shift) = self.shifts();
        (u16::from(high) << high_shift) | (u16::from(low) >> low_shift)
    }

    /// Converts a raw reading into whole units.
    pub fn value(self, raw: u16) -> i32 {
        i32::from(raw) / self.scale() - self.offset()
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Temperature => f.write_str("temperature"),
            Self::Humidity => f.write_str("humidity"),
        }
    }
}

/// Decodes the temperature data registers into °C.
pub fn decode_temperature(high: u8, low: u8) -> i32 {
    let quantity = Quantity::Temperature;
    quantity.value(quantity.raw(high, low))
}

/// Decodes the humidity data registers into %RH.
pub fn decode_humidity(high: u8, low: u8) -> i32 {
    let quantity = Quantity::Humidity;
    quantity.value(quantity.raw(high, low))
}

/// Decodes the identity register into the device id.
pub fn decode_device_id(id: u8) -> u8 {
    id >> 4
}

/// Result of one conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Measurement {
    /// Measured quantity.
    pub quantity: Quantity,
    /// Raw reading.
    pub raw: u16,
}

impl Measurement {
    /// Value in whole units.
    pub fn value(&self) -> i32 {
        self.quantity.value(self.raw)
    }

    /// Value including the fractional part.
    pub fn value_f32(&self) -> f32 {
        f32::from(self.raw) / self.quantity.scale() as f32 - self.quantity.offset() as f32
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:.2} {}", self.value_f32(), self.quantity.unit())
    }
}

/// Checks whether a sensor answers at `address`.
///
/// Clears the configuration register. An address NAK means no sensor is present.
pub async fn probe<T: Transport>(bridge: &I2cBridge<T>, address: u8) -> Result<bool> {
    let _sequence = bridge.lock_sequence().await;
    match bridge.write_register(address, REG_CONFIG, 0).await {
        Ok(()) => Ok(true),
        Err(Error::Protocol(ProtocolError::DeviceRejected(XferStatus::AddrNak))) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Si7005 sensor at one I2C address of the board.
pub struct Sensor<T> {
    bridge: Arc<I2cBridge<T>>,
    address: u8,
    config: SensorConfig,
}

impl<T> fmt::Debug for Sensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Sensor").field("address", &self.address).field("config", &self.config).finish()
    }
}

impl<T: Transport> Sensor<T> {
    /// Sensor at `address` with default settings.
    pub fn new(bridge: Arc<I2cBridge<T>>, address: u8) -> Self {
        Self::with_config(bridge, address, SensorConfig::default())
    }

    /// Sensor at `address` with the specified settings.
    pub fn with_config(bridge: Arc<I2cBridge<T>>, address: u8, config: SensorConfig) -> Self {
        Self { bridge, address, config }
    }

    /// I2C address.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Current settings.
    pub fn config(&self) -> &SensorConfig {
        &self.config
    }

    /// Sets fast conversion for following measurements.
    pub fn set_fast_conversion(&mut self, fast_conversion: bool) {
        self.config.fast_conversion = fast_conversion;
    }

    /// Sets the status polling policy.
    pub fn set_poll(&mut self, poll: PollConfig) {
        self.config.poll = poll;
    }

    /// Switches the heater.
    pub async fn set_heater(&mut self, heater: bool) -> Result<()> {
        let config = self.config.with_heater(heater);
        let _sequence = self.bridge.lock_sequence().await;
        self.bridge
            .write_register(self.address, REG_CONFIG, config.idle())
            .await
            .map_err(|err| err.at(Step::Heater))?;
        self.config = config;
        tracing::debug!("sensor {:#04x}: heater {}", self.address, if heater { "on" } else { "off" });
        Ok(())
    }

    /// Reads the device id.
    pub async fn device_id(&self) -> Result<u8> {
        let id = self.bridge.read_register(self.address, REG_ID).await.map_err(|err| err.at(Step::Identify))?;
        Ok(decode_device_id(id))
    }

    /// Measures the temperature in °C.
    pub async fn temperature(&self) -> Result<i32> {
        Ok(self.measure(Quantity::Temperature).await?.value())
    }

    /// Measures the relative humidity in %RH.
    pub async fn humidity(&self) -> Result<i32> {
        Ok(self.measure(Quantity::Humidity).await?.value())
    }

    /// Runs a complete conversion of `quantity`.
    ///
    /// Other measurements on the same board wait until this one finished.
    pub async fn measure(&self, quantity: Quantity) -> Result<Measurement> {
        let _sequence = self.bridge.lock_sequence().await;

        let idle = self.config.idle();
        self.bridge.write_register(self.address, REG_CONFIG, idle).await.map_err(|err| err.at(Step::Clear))?;

        let mut start = idle | quantity.start_bits();
        if self.config.fast_conversion {
            start |= CONFIG_FAST;
        }
        self.bridge.write_register(self.address, REG_CONFIG, start).await.map_err(|err| err.at(Step::Start))?;

        let attempts = self.poll().await.map_err(|err| err.at(Step::Poll))?;

        let high =
            self.bridge.read_register(self.address, REG_DATA).await.map_err(|err| err.at(Step::Acquire))?;
        let low =
            self.bridge.read_register(self.address, REG_DATA + 1).await.map_err(|err| err.at(Step::Acquire))?;

        let measurement = Measurement { quantity, raw: quantity.raw(high, low) };
        tracing::debug!("sensor {:#04x}: {quantity} {measurement} after {attempts} status reads", self.address);
        Ok(measurement)
    }

    /// Waits until the conversion finished.
    ///
    /// Returns the number of status reads.
    async fn poll(&self) -> Result<u32> {
        let PollConfig { max_attempts, interval } = self.config.poll;
        let max_attempts = max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let status = self.bridge.read_register(self.address, REG_STATUS).await?;
            if status & STATUS_NOT_READY == 0 {
                return Ok(attempt);
            }

            if attempt < max_attempts {
                sleep(interval).await;
            }
        }

        tracing::warn!("sensor {:#04x}: conversion not ready after {max_attempts} status reads", self.address);
        Err(ProtocolError::Timeout { attempts: max_attempts }.into())
    }
}
