//! Transfer channel: the packet buffer of one board and its submit/collect handshake.

use bytes::Bytes;
use std::fmt;
use tokio::sync::{Mutex, MutexGuard};

use crate::{
    packet::{TransferPacket, XferStatus, PACKET_SIZE},
    transport::Transport,
    ProtocolError, Result,
};

/// State of the packet buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelState {
    /// No transfer in flight.
    #[default]
    Empty,
    /// A packet was sent and its reply has not been collected.
    AwaitingReply,
    /// The last transfer failed or was interrupted.
    Error,
}

struct Inner {
    buffer: [u8; PACKET_SIZE],
    state: ChannelState,
}

/// Packet channel to the firmware of one evaluation board.
///
/// At most one packet is in flight at any time.
/// Use [`execute`](Self::execute) to perform a complete transfer; it holds the
/// channel for the whole submit/collect pair.
pub struct TransferChannel<T> {
    name: String,
    transport: T,
    inner: Mutex<Inner>,
}

impl<T> fmt::Debug for TransferChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("TransferChannel").field(&self.name).finish()
    }
}

impl<T: Transport> TransferChannel<T> {
    /// Creates a channel over the bulk endpoints of `transport`.
    pub fn new(transport: T) -> Self {
        Self::with_name(transport, "si700x")
    }

    /// Creates a channel with a name used for logging.
    pub fn with_name(transport: T, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport,
            inner: Mutex::new(Inner { buffer: [0; PACKET_SIZE], state: ChannelState::Empty }),
        }
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Current state.
    pub async fn state(&self) -> ChannelState {
        self.inner.lock().await.state
    }

    /// Acquires exclusive use of the channel until the lease is dropped.
    pub async fn lock(&self) -> ChannelLease<'_, T> {
        ChannelLease { channel: self, inner: self.inner.lock().await }
    }

    /// Sends a packet, locking the channel for this call only.
    ///
    /// Another caller may interleave before the matching [`collect`](Self::collect).
    pub async fn submit(&self, packet: &TransferPacket) -> Result<()> {
        self.lock().await.submit(packet).await
    }

    /// Receives the reply to the submitted packet, locking the channel for this call only.
    pub async fn collect(&self) -> Result<TransferPacket> {
        self.lock().await.collect().await
    }

    /// Sends a packet and receives its reply while holding the channel.
    ///
    /// A reply left outstanding by an interrupted caller is discarded first.
    /// The reply must be for the same address and transfer kind as the request.
    ///
    /// Dropping the returned future before it completes leaves the channel in
    /// [`ChannelState::Error`]; the next call recovers from it. A transfer the
    /// transport already started is not aborted, see [`Transport`].
    pub async fn execute(&self, packet: &TransferPacket) -> Result<TransferPacket> {
        let mut lease = self.lock().await;
        lease.resync().await;

        lease.submit(packet).await?;
        let reply = lease.collect().await?;

        if reply.address != packet.address || reply.kind != packet.kind {
            tracing::warn!("{}: reply {reply} does not match request {packet}", self.name);
            return Err(ProtocolError::UnexpectedReply { expected: packet.address, actual: reply.address }.into());
        }

        Ok(reply)
    }
}

/// Exclusive use of a [`TransferChannel`].
pub struct ChannelLease<'a, T> {
    channel: &'a TransferChannel<T>,
    inner: MutexGuard<'a, Inner>,
}

impl<T> fmt::Debug for ChannelLease<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ChannelLease").field("channel", &self.channel.name).field("state", &self.inner.state).finish()
    }
}

impl<T: Transport> ChannelLease<'_, T> {
    /// Current state.
    pub fn state(&self) -> ChannelState {
        self.inner.state
    }

    /// Forgets any transfer in flight.
    pub fn reset(&mut self) {
        self.inner.state = ChannelState::Empty;
    }

    /// Sends a packet.
    ///
    /// The status field is sent as [`XferStatus::None`].
    pub async fn submit(&mut self, packet: &TransferPacket) -> Result<()> {
        let mut packet = *packet;
        packet.status = XferStatus::None;
        self.submit_bytes(&packet.to_bytes()).await
    }

    /// Sends a packet given in wire form.
    pub async fn submit_bytes(&mut self, data: &[u8]) -> Result<()> {
        if data.len() != PACKET_SIZE {
            return Err(ProtocolError::SizeMismatch { expected: PACKET_SIZE, actual: data.len() }.into());
        }

        match self.inner.state {
            ChannelState::Empty => (),
            ChannelState::AwaitingReply => return Err(ProtocolError::Pending.into()),
            ChannelState::Error => return Err(ProtocolError::Faulted.into()),
        }

        self.inner.buffer.copy_from_slice(data);
        self.inner.state = ChannelState::Error;

        let n = self.channel.transport.bulk_out(Bytes::copy_from_slice(&self.inner.buffer)).await?;
        if n != PACKET_SIZE {
            tracing::warn!("{}: short write of {n} bytes", self.channel.name);
            return Err(ProtocolError::SizeMismatch { expected: PACKET_SIZE, actual: n }.into());
        }

        #[cfg(feature = "trace-packets")]
        tracing::trace!("{}: sent {:02x?}", self.channel.name, self.inner.buffer);

        self.inner.state = ChannelState::AwaitingReply;
        Ok(())
    }

    /// Receives the reply to the submitted packet.
    ///
    /// Fails with [`ProtocolError::DeviceRejected`] if the device did not report success.
    pub async fn collect(&mut self) -> Result<TransferPacket> {
        if self.inner.state != ChannelState::AwaitingReply {
            return Err(ProtocolError::NotReady.into());
        }
        self.inner.state = ChannelState::Error;

        let reply = self.channel.transport.bulk_in(PACKET_SIZE).await?;
        if reply.len() != PACKET_SIZE {
            tracing::warn!("{}: reply of {} bytes", self.channel.name, reply.len());
            return Err(ProtocolError::SizeMismatch { expected: PACKET_SIZE, actual: reply.len() }.into());
        }
        self.inner.buffer.copy_from_slice(&reply);

        #[cfg(feature = "trace-packets")]
        tracing::trace!("{}: received {:02x?}", self.channel.name, self.inner.buffer);

        let packet = TransferPacket::decode(&self.inner.buffer)?;
        self.inner.state = ChannelState::Empty;

        if packet.status != XferStatus::Success {
            tracing::debug!("{}: device rejected transfer: {packet}", self.channel.name);
            return Err(ProtocolError::DeviceRejected(packet.status).into());
        }

        Ok(packet)
    }

    /// Receives the reply to the submitted packet in wire form.
    pub async fn collect_into(&mut self, buf: &mut [u8]) -> Result<()> {
        if buf.len() != PACKET_SIZE {
            return Err(ProtocolError::SizeMismatch { expected: PACKET_SIZE, actual: buf.len() }.into());
        }

        self.collect().await?;
        buf.copy_from_slice(&self.inner.buffer);
        Ok(())
    }

    /// Brings the channel back to [`ChannelState::Empty`].
    ///
    /// A failed transfer is only forgotten here. Waiting for a transfer that is
    /// still running on the bus is left to the transport.
    async fn resync(&mut self) {
        match self.inner.state {
            ChannelState::Empty => (),
            ChannelState::AwaitingReply => {
                tracing::warn!("{}: discarding reply of an interrupted transfer", self.channel.name);
                if let Err(err) = self.collect().await {
                    tracing::debug!("{}: discarded reply: {err}", self.channel.name);
                }
                self.reset();
            }
            ChannelState::Error => {
                tracing::warn!("{}: recovering from failed transfer", self.channel.name);
                self.reset();
            }
        }
    }
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;
    use std::{
        collections::VecDeque,
        io::{Error, ErrorKind},
        sync::Mutex as StdMutex,
    };

    use super::*;
    use crate::Error as CrateError;

    /// Echoes every packet back with success status.
    #[derive(Default)]
    struct Loopback {
        queue: StdMutex<VecDeque<Vec<u8>>>,
    }

    impl Transport for Loopback {
        async fn bulk_out(&self, data: Bytes) -> std::io::Result<usize> {
            let mut reply = data.to_vec();
            reply[1] = XferStatus::Success as u8;
            self.queue.lock().unwrap().push_back(reply);
            Ok(data.len())
        }

        async fn bulk_in(&self, _len: usize) -> std::io::Result<BytesMut> {
            match self.queue.lock().unwrap().pop_front() {
                Some(reply) => Ok(BytesMut::from(&reply[..])),
                None => Err(Error::new(ErrorKind::TimedOut, "no reply")),
            }
        }
    }

    #[tokio::test]
    async fn submit_then_collect() {
        let channel = TransferChannel::new(Loopback::default());
        let packet = TransferPacket::write(0x40, &[0x03, 0x00]).unwrap();

        channel.submit(&packet).await.unwrap();
        assert_eq!(channel.state().await, ChannelState::AwaitingReply);

        let reply = channel.collect().await.unwrap();
        assert_eq!(reply.address, packet.address);
        assert_eq!(reply.kind, packet.kind);
        assert_eq!(reply.status, XferStatus::Success);
        assert_eq!(channel.state().await, ChannelState::Empty);
    }

    #[tokio::test]
    async fn collect_without_submit() {
        let channel = TransferChannel::new(Loopback::default());
        let err = channel.collect().await.unwrap_err();
        assert!(matches!(err, CrateError::Protocol(ProtocolError::NotReady)));
    }

    #[tokio::test]
    async fn second_collect_is_rejected() {
        let channel = TransferChannel::new(Loopback::default());
        channel.submit(&TransferPacket::read(0x40, 1).unwrap()).await.unwrap();
        channel.collect().await.unwrap();

        let err = channel.collect().await.unwrap_err();
        assert!(matches!(err, CrateError::Protocol(ProtocolError::NotReady)));
    }

    #[tokio::test]
    async fn second_submit_is_rejected() {
        let channel = TransferChannel::new(Loopback::default());
        let packet = TransferPacket::read(0x40, 1).unwrap();
        channel.submit(&packet).await.unwrap();

        let err = channel.submit(&packet).await.unwrap_err();
        assert!(matches!(err, CrateError::Protocol(ProtocolError::Pending)));
    }

    #[tokio::test]
    async fn raw_buffers_must_have_packet_size() {
        let channel = TransferChannel::new(Loopback::default());
        let mut lease = channel.lock().await;

        let err = lease.submit_bytes(&[0x10, 0x00, 0x40]).await.unwrap_err();
        assert!(matches!(err, CrateError::Protocol(ProtocolError::SizeMismatch { expected: 8, actual: 3 })));
        assert_eq!(lease.state(), ChannelState::Empty);

        lease.submit_bytes(&[0x10, 0x00, 0x40, 0x00, 0, 0, 0, 0]).await.unwrap();
        let mut buf = [0; 12];
        let err = lease.collect_into(&mut buf).await.unwrap_err();
        assert!(matches!(err, CrateError::Protocol(ProtocolError::SizeMismatch { expected: 8, actual: 12 })));
        assert_eq!(lease.state(), ChannelState::AwaitingReply);

        let mut buf = [0; PACKET_SIZE];
        lease.collect_into(&mut buf).await.unwrap();
        assert_eq!(buf, [0x10, 0x01, 0x40, 0x00, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn execute_discards_stale_reply() {
        let channel = TransferChannel::new(Loopback::default());
        channel.submit(&TransferPacket::write(0x41, &[0x03]).unwrap()).await.unwrap();

        let request = TransferPacket::write_read(0x40, 0x11, 1).unwrap();
        let reply = channel.execute(&request).await.unwrap();
        assert_eq!(reply.address, 0x40);
        assert_eq!(reply.kind, request.kind);
        assert_eq!(channel.state().await, ChannelState::Empty);
    }
}
