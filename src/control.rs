//! Discrete board commands on the control pipe.
//!
//! Each command is a single vendor request without protocol state.
//! Commands do not touch the transfer channel.

use bytes::BytesMut;
use std::fmt;

use crate::{transport::ControlTransport, ProtocolError, Result};

/// Direction of a vendor request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Host to device, no data stage.
    Out,
    /// Device to host.
    In,
}

/// Encoding of a command as vendor request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Request {
    /// Request code.
    pub request: u8,
    /// Transfer direction.
    pub direction: Direction,
    /// Request value.
    pub value: u16,
    /// Request index.
    pub index: u16,
    /// Size of the reply.
    pub reply_len: usize,
}

/// Request codes understood by the board firmware.
pub mod req {
    /// Read the firmware version.
    pub const GET_VERSION: u8 = 0;
    /// Switch the LED.
    pub const SET_LED: u8 = 1;
    /// Switch sleep of a port.
    pub const SET_SLEEP: u8 = 2;
    /// Switch programming mode.
    pub const SET_PROG: u8 = 3;
    /// Read the number of ports.
    pub const GET_PORT_COUNT: u8 = 4;
    /// Read the board id.
    pub const GET_BOARD_ID: u8 = 5;
}

/// Board command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Switch the LED on.
    LedOn,
    /// Switch the LED off.
    LedOff,
    /// Enter programming mode.
    ProgOn,
    /// Leave programming mode.
    ProgOff,
    /// Put the port to sleep.
    SleepOn(u8),
    /// Wake the port.
    SleepOff(u8),
    /// Read the firmware version.
    Version,
    /// Read the number of sensor ports.
    PortCount,
    /// Read the board id.
    BoardId,
}

/// Request code, direction, value and reply size per command, indexed by [`Command::slot`].
const COMMANDS: [(u8, Direction, u16, usize); 9] = [
    (req::SET_LED, Direction::Out, 1, 0),
    (req::SET_LED, Direction::Out, 0, 0),
    (req::SET_PROG, Direction::Out, 1, 0),
    (req::SET_PROG, Direction::Out, 0, 0),
    (req::SET_SLEEP, Direction::Out, 1, 0),
    (req::SET_SLEEP, Direction::Out, 0, 0),
    (req::GET_VERSION, Direction::In, 0, 2),
    (req::GET_PORT_COUNT, Direction::In, 0, 1),
    (req::GET_BOARD_ID, Direction::In, 0, 1),
];

impl Command {
    fn slot(self) -> usize {
        match self {
            Self::LedOn => 0,
            Self::LedOff => 1,
            Self::ProgOn => 2,
            Self::ProgOff => 3,
            Self::SleepOn(_) => 4,
            Self::SleepOff(_) => 5,
            Self::Version => 6,
            Self::PortCount => 7,
            Self::BoardId => 8,
        }
    }

    /// The vendor request encoding this command.
    pub fn request(self) -> Request {
        let (request, direction, value, reply_len) = COMMANDS[self.slot()];
        let index = match self {
            Self::SleepOn(port) | Self::SleepOff(port) => port.into(),
            _ => 0,
        };
        Request { request, direction, value, index, reply_len }
    }

    /// Decodes the reply data of this command.
    pub fn decode(self, data: &[u8]) -> Result<Reply> {
        self.check_reply(data)?;

        Ok(match self {
            Self::Version => Reply::Version(u16::from_le_bytes([data[0], data[1]])),
            Self::PortCount => Reply::PortCount(data[0]),
            Self::BoardId => Reply::BoardId(data[0]),
            _ => Reply::Done,
        })
    }

    fn check_reply(self, data: &[u8]) -> Result<()> {
        let Request { reply_len, .. } = self.request();
        if data.len() < reply_len {
            return Err(ProtocolError::SizeMismatch { expected: reply_len, actual: data.len() }.into());
        }
        Ok(())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::LedOn => write!(f, "LED on"),
            Self::LedOff => write!(f, "LED off"),
            Self::ProgOn => write!(f, "programming on"),
            Self::ProgOff => write!(f, "programming off"),
            Self::SleepOn(port) => write!(f, "sleep on for port {port}"),
            Self::SleepOff(port) => write!(f, "sleep off for port {port}"),
            Self::Version => write!(f, "get version"),
            Self::PortCount => write!(f, "get port count"),
            Self::BoardId => write!(f, "get board id"),
        }
    }
}

/// Reply to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reply {
    /// Command without reply data was accepted.
    Done,
    /// Firmware version.
    Version(u16),
    /// Number of sensor ports.
    PortCount(u8),
    /// Board id.
    BoardId(u8),
}

/// Discrete commands of an evaluation board.
pub struct ControlSurface<T> {
    transport: T,
}

impl<T> fmt::Debug for ControlSurface<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ControlSurface").finish()
    }
}

impl<T: ControlTransport> ControlSurface<T> {
    /// Creates the control surface on the control pipe of `transport`.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Issues a command and decodes its reply.
    pub async fn send(&self, command: Command) -> Result<Reply> {
        match command.request().direction {
            Direction::Out => {
                self.exchange(command).await?;
                Ok(Reply::Done)
            }
            Direction::In => command.decode(&self.exchange(command).await?),
        }
    }

    /// Issues a command and returns its raw reply data of checked length.
    async fn exchange(&self, command: Command) -> Result<BytesMut> {
        let req = command.request();
        tracing::debug!("{command}");

        let reply = match req.direction {
            Direction::Out => {
                self.transport.control_out(req.request, req.value, req.index).await.map(|()| BytesMut::new())
            }
            Direction::In => self.transport.control_in(req.request, req.value, req.index, req.reply_len).await,
        };
        let reply = reply.inspect_err(|err| tracing::warn!("{command} failed: {err}"))?;

        command.check_reply(&reply)?;
        Ok(reply)
    }

    /// Switches the LED.
    pub async fn set_led(&self, on: bool) -> Result<()> {
        self.send(if on { Command::LedOn } else { Command::LedOff }).await?;
        Ok(())
    }

    /// Switches programming mode.
    pub async fn set_programming(&self, on: bool) -> Result<()> {
        self.send(if on { Command::ProgOn } else { Command::ProgOff }).await?;
        Ok(())
    }

    /// Switches sleep of a sensor port.
    pub async fn set_sleep(&self, port: u8, on: bool) -> Result<()> {
        self.send(if on { Command::SleepOn(port) } else { Command::SleepOff(port) }).await?;
        Ok(())
    }

    /// Reads the firmware version.
    pub async fn version(&self) -> Result<u16> {
        let data = self.exchange(Command::Version).await?;
        Ok(u16::from_le_bytes([data[0], data[1]]))
    }

    /// Reads the number of sensor ports.
    pub async fn port_count(&self) -> Result<u8> {
        let data = self.exchange(Command::PortCount).await?;
        Ok(data[0])
    }

    /// Reads the board id.
    pub async fn board_id(&self) -> Result<u8> {
        let data = self.exchange(Command::BoardId).await?;
        Ok(data[0])
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn request_table() {
        assert_eq!(
            Command::LedOn.request(),
            Request { request: 1, direction: Direction::Out, value: 1, index: 0, reply_len: 0 }
        );
        assert_eq!(
            Command::SleepOff(3).request(),
            Request { request: 2, direction: Direction::Out, value: 0, index: 3, reply_len: 0 }
        );
        assert_eq!(
            Command::ProgOff.request(),
            Request { request: 3, direction: Direction::Out, value: 0, index: 0, reply_len: 0 }
        );
        assert_eq!(
            Command::Version.request(),
            Request { request: 0, direction: Direction::In, value: 0, index: 0, reply_len: 2 }
        );
        assert_eq!(Command::BoardId.request().request, 5);
        assert_eq!(Command::PortCount.request().request, 4);
    }

    #[test]
    fn reply_decoding() {
        assert_eq!(Command::Version.decode(&[0x02, 0x01]).unwrap(), Reply::Version(0x0102));
        assert_eq!(Command::PortCount.decode(&[4]).unwrap(), Reply::PortCount(4));
        assert_eq!(Command::LedOff.decode(&[]).unwrap(), Reply::Done);
        assert!(Command::Version.decode(&[0x02]).is_err());
    }
}
