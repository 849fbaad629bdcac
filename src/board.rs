//! Evaluation board.

use std::{fmt, sync::Arc};

use crate::{
    bridge::I2cBridge,
    channel::TransferChannel,
    control::ControlSurface,
    sensor::{probe, Sensor, SensorConfig, SENSOR_ADDRESSES},
    transport::{ControlTransport, Transport},
    Result,
};

/// One attached evaluation board.
pub struct Board<T> {
    name: String,
    bridge: Arc<I2cBridge<Arc<T>>>,
    control: ControlSurface<Arc<T>>,
}

impl<T> fmt::Debug for Board<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Board").field(&self.name).finish()
    }
}

impl<T: Transport + ControlTransport> Board<T> {
    /// Creates a board on `transport`.
    pub fn new(transport: T) -> Self {
        Self::with_name(transport, "si700x")
    }

    /// Creates a board with a name used for logging.
    pub fn with_name(transport: T, name: impl Into<String>) -> Self {
        let name = name.into();
        let transport = Arc::new(transport);
        let channel = TransferChannel::with_name(transport.clone(), name.clone());
        Self { name, bridge: Arc::new(I2cBridge::from_channel(channel)), control: ControlSurface::new(transport) }
    }

    /// Board name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// I2C bridge of the board.
    pub fn bridge(&self) -> &Arc<I2cBridge<Arc<T>>> {
        &self.bridge
    }

    /// Discrete commands of the board.
    pub fn control(&self) -> &ControlSurface<Arc<T>> {
        &self.control
    }

    /// Sensor at `address` with default settings.
    pub fn sensor(&self, address: u8) -> Sensor<Arc<T>> {
        Sensor::new(self.bridge.clone(), address)
    }

    /// Sensor at `address` with the specified settings.
    pub fn sensor_with_config(&self, address: u8, config: SensorConfig) -> Sensor<Arc<T>> {
        Sensor::with_config(self.bridge.clone(), address, config)
    }

    /// Leaves programming mode and wakes all sensor ports.
    ///
    /// Returns the number of ports.
    pub async fn wake(&self) -> Result<u8> {
        self.control.set_programming(false).await?;

        let ports = self.control.port_count().await?;
        for port in 0..ports {
            self.control.set_sleep(port, false).await?;
        }

        tracing::debug!("{}: {ports} ports awake", self.name);
        Ok(ports)
    }

    /// Addresses of the sensors answering at the default sensor addresses.
    pub async fn scan(&self) -> Result<Vec<u8>> {
        self.scan_addresses(SENSOR_ADDRESSES).await
    }

    /// Addresses of the sensors answering among `addresses`.
    pub async fn scan_addresses(&self, addresses: impl IntoIterator<Item = u8>) -> Result<Vec<u8>> {
        let mut found = Vec::new();
        for address in addresses {
            if probe(&*self.bridge, address).await? {
                tracing::debug!("{}: sensor found at {address:#04x}", self.name);
                found.push(address);
            }
        }
        Ok(found)
    }
}
