//! I2C operations carried out by the board firmware.

use bytes::Bytes;
use std::fmt;
use tokio::sync::{Mutex, MutexGuard};

use crate::{
    channel::TransferChannel,
    packet::{TransferPacket, DATA_SIZE},
    transport::Transport,
    Result,
};

/// I2C master bridged through the evaluation board.
///
/// Every operation is one packet submitted and one reply collected.
/// Register sequences spanning several operations, such as a sensor
/// measurement, hold the [sequence lock](Self::lock_sequence) while they run.
pub struct I2cBridge<T> {
    channel: TransferChannel<T>,
    sequence: Mutex<()>,
}

impl<T> fmt::Debug for I2cBridge<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("I2cBridge").field(&self.channel).finish()
    }
}

impl<T: Transport> I2cBridge<T> {
    /// Creates a bridge using the bulk endpoints of `transport`.
    pub fn new(transport: T) -> Self {
        Self::from_channel(TransferChannel::new(transport))
    }

    /// Creates a bridge on top of an existing channel.
    pub fn from_channel(channel: TransferChannel<T>) -> Self {
        Self { channel, sequence: Mutex::new(()) }
    }

    /// The transfer channel.
    pub fn channel(&self) -> &TransferChannel<T> {
        &self.channel
    }

    /// Acquires the bridge for a sequence of operations.
    ///
    /// Other sequences wait until the guard is dropped.
    /// Single operations are not held back.
    pub async fn lock_sequence(&self) -> MutexGuard<'_, ()> {
        self.sequence.lock().await
    }

    /// Writes up to four bytes to the slave at `address`.
    ///
    /// The first byte usually selects the register.
    pub async fn write(&self, address: u8, data: &[u8]) -> Result<()> {
        let request = TransferPacket::write(address, data)?;
        tracing::debug!("write {:02x?} to {address:#04x}", data);
        self.channel.execute(&request).await?;
        Ok(())
    }

    /// Reads `length` bytes from the slave at `address`.
    pub async fn read(&self, address: u8, length: usize) -> Result<Bytes> {
        let request = TransferPacket::read(address, length)?;
        let reply = self.channel.execute(&request).await?;
        Ok(reply_data(&reply, length))
    }

    /// Writes `register` to the slave at `address`, then reads `length` bytes back.
    pub async fn write_read(&self, address: u8, register: u8, length: usize) -> Result<Bytes> {
        let request = TransferPacket::write_read(address, register, length)?;
        let reply = self.channel.execute(&request).await?;
        let data = reply_data(&reply, length);
        tracing::debug!("read {:02x?} from {address:#04x} register {register:#04x}", &data[..]);
        Ok(data)
    }

    /// Reads a single register.
    pub async fn read_register(&self, address: u8, register: u8) -> Result<u8> {
        let data = self.write_read(address, register, 1).await?;
        Ok(data[0])
    }

    /// Writes a single register.
    pub async fn write_register(&self, address: u8, register: u8, value: u8) -> Result<()> {
        self.write(address, &[register, value]).await
    }
}

fn reply_data(reply: &TransferPacket, length: usize) -> Bytes {
    Bytes::copy_from_slice(&reply.raw_data()[..length.min(DATA_SIZE)])
}
