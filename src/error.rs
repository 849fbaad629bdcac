//! Error types.

use std::{fmt, io};

use crate::{packet::XferStatus, registry::DeviceId};

/// Result type of this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Step of a sensor sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Clearing the configuration register.
    Clear,
    /// Starting a conversion.
    Start,
    /// Polling the status register.
    Poll,
    /// Reading the data registers.
    Acquire,
    /// Reading the identity register.
    Identify,
    /// Switching the heater.
    Heater,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Clear => "clear",
            Self::Start => "start",
            Self::Poll => "poll",
            Self::Acquire => "acquire",
            Self::Identify => "identify",
            Self::Heater => "heater",
        };
        f.write_str(name)
    }
}

/// Violation of the transfer protocol, detected by the host or reported by the device.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Collect without a preceding successful submit.
    #[error("no transfer awaiting a reply")]
    NotReady,
    /// Submit while a reply is still outstanding.
    #[error("a reply is still pending")]
    Pending,
    /// Submit after a failed transfer without a reset.
    #[error("channel faulted by a failed transfer")]
    Faulted,
    /// The device finished the transfer with a status other than success.
    #[error("device rejected transfer: {0}")]
    DeviceRejected(XferStatus),
    /// The status register never reported ready.
    #[error("conversion not ready after {attempts} status reads")]
    Timeout {
        /// Number of status reads performed.
        attempts: u32,
    },
    /// A buffer did not have the size of a transfer packet.
    #[error("expected {expected} bytes but got {actual}")]
    SizeMismatch {
        /// Required size.
        expected: usize,
        /// Provided size.
        actual: usize,
    },
    /// More data bytes than a packet can carry.
    #[error("{0} data bytes do not fit into a transfer packet")]
    InvalidLength(usize),
    /// A received packet contained an invalid field value.
    #[error("invalid value {value:#04x} at offset {offset}")]
    Malformed {
        /// Byte offset within the packet.
        offset: usize,
        /// Byte value found.
        value: u8,
    },
    /// The reply does not belong to the submitted request.
    #[error("reply for address {actual:#04x} does not match request for {expected:#04x}")]
    UnexpectedReply {
        /// Address of the request.
        expected: u8,
        /// Address of the reply.
        actual: u8,
    },
}

/// Error of an evaluation board operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The USB transfer failed or timed out.
    #[error("USB transfer failed: {0}")]
    Transport(#[from] io::Error),
    /// The transfer protocol was violated.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// A sensor sequence aborted.
    #[error("{step} step failed: {source}")]
    Step {
        /// Failing step.
        step: Step,
        /// Cause.
        #[source]
        source: Box<Error>,
    },
    /// A board with this id is registered already.
    #[error("board {0} is attached already")]
    AlreadyAttached(DeviceId),
    /// No board with this id is registered.
    #[error("board {0} is not attached")]
    NotAttached(DeviceId),
}

impl Error {
    /// Annotates the error with the sensor step it occurred in.
    pub(crate) fn at(self, step: Step) -> Self {
        Self::Step { step, source: Box::new(self) }
    }

    /// The sensor step that failed, if any.
    pub fn step(&self) -> Option<Step> {
        match self {
            Self::Step { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// The protocol error, looking through step annotations.
    pub fn protocol(&self) -> Option<&ProtocolError> {
        match self {
            Self::Protocol(err) => Some(err),
            Self::Step { source, .. } => source.protocol(),
            _ => None,
        }
    }

    /// The status the device reported, if it rejected a transfer.
    pub fn status(&self) -> Option<XferStatus> {
        match self.protocol() {
            Some(ProtocolError::DeviceRejected(status)) => Some(*status),
            _ => None,
        }
    }

    /// Whether the error was caused by the transport.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Step { source, .. } => source.is_transport(),
            _ => false,
        }
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        io::Error::new(io_kind(&error), error)
    }
}

fn io_kind(error: &Error) -> io::ErrorKind {
    match error {
        Error::Transport(err) => err.kind(),
        Error::Protocol(err) => protocol_kind(err),
        Error::Step { source, .. } => io_kind(source),
        Error::AlreadyAttached(_) => io::ErrorKind::ResourceBusy,
        Error::NotAttached(_) => io::ErrorKind::NotFound,
    }
}

fn protocol_kind(error: &ProtocolError) -> io::ErrorKind {
    match error {
        ProtocolError::NotReady | ProtocolError::Pending | ProtocolError::Faulted => io::ErrorKind::ResourceBusy,
        ProtocolError::DeviceRejected(XferStatus::AddrNak) => io::ErrorKind::NotFound,
        ProtocolError::DeviceRejected(XferStatus::Timeout) | ProtocolError::Timeout { .. } => io::ErrorKind::TimedOut,
        ProtocolError::DeviceRejected(_) => io::ErrorKind::ConnectionAborted,
        ProtocolError::SizeMismatch { .. } | ProtocolError::InvalidLength(_) => io::ErrorKind::InvalidInput,
        ProtocolError::Malformed { .. } | ProtocolError::UnexpectedReply { .. } => io::ErrorKind::InvalidData,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn step_annotation_keeps_status() {
        let err = Error::from(ProtocolError::DeviceRejected(XferStatus::DataNak)).at(Step::Acquire);
        assert_eq!(err.step(), Some(Step::Acquire));
        assert_eq!(err.status(), Some(XferStatus::DataNak));
        assert_eq!(err.to_string(), "acquire step failed: device rejected transfer: data NAK");
    }

    #[test]
    fn io_error_kind() {
        let err: io::Error = Error::from(ProtocolError::Timeout { attempts: 20 }).at(Step::Poll).into();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        let err: io::Error = Error::from(io::Error::from(io::ErrorKind::BrokenPipe)).into();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
