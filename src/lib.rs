//! Host driver for the Silicon Labs Si700x USB evaluation board.
//!
//! The board bridges the host to Si7005 humidity and temperature sensors on an
//! I2C bus. Every I2C transfer is an 8-byte [`TransferPacket`] sent to the board
//! firmware, followed by the reply packet carrying the transfer status and the
//! data read.
//!
//! Layers, bottom to top:
//! * [`Transport`] and [`ControlTransport`]: the USB endpoints,
//!   implemented natively by the [`host`] module (crate feature `host`),
//! * [`TransferChannel`]: the packet buffer and its submit/collect handshake,
//! * [`I2cBridge`]: write, read and write-then-read operations,
//! * [`Sensor`]: conversions, status polling and decoding of readings.
//!
//! Discrete board commands are issued through the [`ControlSurface`];
//! attached boards can be tracked in a [`Registry`].

mod board;
mod bridge;
mod channel;
mod error;
mod registry;
mod transport;

pub mod control;
pub mod packet;
pub mod sensor;

#[cfg(feature = "host")]
pub mod host;

pub use board::Board;
pub use bridge::I2cBridge;
pub use channel::{ChannelLease, ChannelState, TransferChannel};
pub use control::ControlSurface;
pub use error::{Error, ProtocolError, Result, Step};
pub use packet::{TransferKind, TransferPacket, XferStatus, PACKET_SIZE};
pub use registry::{DeviceId, Registry};
pub use sensor::{Measurement, PollConfig, Quantity, Sensor, SensorConfig};
pub use transport::{ControlTransport, Transport};
