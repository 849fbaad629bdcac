//! Transfer packet exchanged with the board firmware.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use crate::ProtocolError;

/// Size of a transfer packet on the wire.
pub const PACKET_SIZE: usize = 8;

/// Maximum number of data bytes carried by a transfer packet.
pub const DATA_SIZE: usize = 4;

const OFFSET_KIND: usize = 0;
const OFFSET_STATUS: usize = 1;
const OFFSET_ADDRESS: usize = 2;
const OFFSET_LENGTH: usize = 3;
const OFFSET_DATA: usize = 4;

/// I2C operation requested of the board firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransferKind {
    /// Write data bytes to the slave.
    Write = 0x10,
    /// Read data bytes from the slave.
    Read = 0x20,
    /// Write the register byte, then read with a repeated start.
    WriteRead = 0x30,
}

impl TryFrom<u8> for TransferKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x10 => Ok(Self::Write),
            0x20 => Ok(Self::Read),
            0x30 => Ok(Self::WriteRead),
            other => Err(other),
        }
    }
}

/// Transfer outcome reported by the board firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum XferStatus {
    /// Not processed yet.
    #[default]
    None = 0,
    /// Transfer completed.
    Success = 1,
    /// Slave did not acknowledge its address.
    AddrNak = 2,
    /// Slave did not acknowledge a data byte.
    DataNak = 3,
    /// Bus transaction timed out.
    Timeout = 4,
    /// Bus arbitration lost.
    ArbLost = 5,
    /// Invalid length field.
    BadLength = 6,
    /// Invalid transfer kind.
    BadMode = 7,
    /// Firmware was not ready for a transfer.
    BadState = 8,
}

impl TryFrom<u8> for XferStatus {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            0 => Self::None,
            1 => Self::Success,
            2 => Self::AddrNak,
            3 => Self::DataNak,
            4 => Self::Timeout,
            5 => Self::ArbLost,
            6 => Self::BadLength,
            7 => Self::BadMode,
            8 => Self::BadState,
            other => return Err(other),
        })
    }
}

impl fmt::Display for XferStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Success => "success",
            Self::AddrNak => "address NAK",
            Self::DataNak => "data NAK",
            Self::Timeout => "bus timeout",
            Self::ArbLost => "arbitration lost",
            Self::BadLength => "bad length",
            Self::BadMode => "bad mode",
            Self::BadState => "bad state",
        };
        f.write_str(name)
    }
}

/// Fixed-size packet carrying one I2C transfer.
///
/// Wire layout: kind, status, address, length, four data bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferPacket {
    /// Requested operation.
    pub kind: TransferKind,
    /// Transfer outcome; [`XferStatus::None`] until the device replied.
    pub status: XferStatus,
    /// I2C slave address.
    pub address: u8,
    length: u8,
    data: [u8; DATA_SIZE],
}

impl TransferPacket {
    /// Creates a packet carrying `data`.
    ///
    /// Fails if `data` is longer than [`DATA_SIZE`].
    pub fn new(kind: TransferKind, address: u8, data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() > DATA_SIZE {
            return Err(ProtocolError::InvalidLength(data.len()));
        }

        let mut buf = [0; DATA_SIZE];
        buf[..data.len()].copy_from_slice(data);
        Ok(Self { kind, status: XferStatus::None, address, length: data.len() as u8, data: buf })
    }

    /// Write of `data` to the slave at `address`.
    pub fn write(address: u8, data: &[u8]) -> Result<Self, ProtocolError> {
        Self::new(TransferKind::Write, address, data)
    }

    /// Read of `length` bytes from the slave at `address`.
    pub fn read(address: u8, length: usize) -> Result<Self, ProtocolError> {
        let mut packet = Self::new(TransferKind::Read, address, &[])?;
        packet.set_length(length)?;
        Ok(packet)
    }

    /// Read of `length` bytes from `register` of the slave at `address`.
    pub fn write_read(address: u8, register: u8, length: usize) -> Result<Self, ProtocolError> {
        let mut packet = Self::new(TransferKind::WriteRead, address, &[register])?;
        packet.set_length(length)?;
        Ok(packet)
    }

    /// Number of meaningful data bytes.
    pub fn len(&self) -> usize {
        self.length.into()
    }

    /// Whether no data byte is meaningful.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Sets the number of meaningful data bytes.
    pub fn set_length(&mut self, length: usize) -> Result<(), ProtocolError> {
        if length > DATA_SIZE {
            return Err(ProtocolError::InvalidLength(length));
        }
        self.length = length as u8;
        Ok(())
    }

    /// Meaningful data bytes.
    ///
    /// A length field beyond [`DATA_SIZE`] received from the device is clamped.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len().min(DATA_SIZE)]
    }

    /// All four data bytes, regardless of the length field.
    pub fn raw_data(&self) -> &[u8; DATA_SIZE] {
        &self.data
    }

    /// Encodes the packet into its wire form.
    pub fn to_bytes(&self) -> [u8; PACKET_SIZE] {
        let mut buf = [0; PACKET_SIZE];
        self.encode(&mut buf[..]);
        buf
    }

    /// Appends the wire form of the packet to `buf`.
    pub fn encode(&self, mut buf: impl BufMut) {
        buf.put_u8(self.kind as u8);
        buf.put_u8(self.status as u8);
        buf.put_u8(self.address);
        buf.put_u8(self.length);
        buf.put_slice(&self.data);
    }

    /// Decodes a packet from its wire form.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() != PACKET_SIZE {
            return Err(ProtocolError::SizeMismatch { expected: PACKET_SIZE, actual: buf.len() });
        }

        let kind = TransferKind::try_from(buf[OFFSET_KIND])
            .map_err(|value| ProtocolError::Malformed { offset: OFFSET_KIND, value })?;
        let status = XferStatus::try_from(buf[OFFSET_STATUS])
            .map_err(|value| ProtocolError::Malformed { offset: OFFSET_STATUS, value })?;

        let mut data = [0; DATA_SIZE];
        data.copy_from_slice(&buf[OFFSET_DATA..]);

        Ok(Self { kind, status, address: buf[OFFSET_ADDRESS], length: buf[OFFSET_LENGTH], data })
    }
}

impl From<TransferPacket> for Bytes {
    fn from(packet: TransferPacket) -> Self {
        let mut buf = BytesMut::with_capacity(PACKET_SIZE);
        packet.encode(&mut buf);
        buf.freeze()
    }
}

impl TryFrom<&[u8]> for TransferPacket {
    type Error = ProtocolError;

    fn try_from(buf: &[u8]) -> Result<Self, ProtocolError> {
        Self::decode(buf)
    }
}

impl fmt::Display for TransferPacket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?} @{:#04x} [{}] {:02x?}", self.kind, self.address, self.status, self.data())
    }
}
