//! Native host backend.
//!
//! Use [`UsbTransport::open`] to open the first attached board, or pass a
//! [`rusb`] device handle to [`UsbTransport::new`].
//!
//! All transport errors returned from this module have an inner error type of [`rusb::Error`].
//!
//! Bulk transfers run on the blocking thread pool. If the future awaiting one is
//! dropped, the transfer keeps running until it completes or times out. The next
//! bulk transfer waits for it, so that an interrupted read cannot consume the
//! reply to a later request.

use bytes::{Bytes, BytesMut};
use rusb::{request_type, DeviceHandle, Direction, GlobalContext, Recipient, RequestType, UsbContext};
use std::{
    fmt,
    io::{Error, ErrorKind, Result},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::{
    sync::oneshot,
    task::{spawn_blocking, JoinError, JoinHandle},
};

use crate::{
    board::Board,
    registry::DeviceId,
    transport::{ControlTransport, Transport},
};

/// USB vendor id of the evaluation board.
pub const VID: u16 = 0x10c4;
/// USB product id of the evaluation board.
pub const PID: u16 = 0x8649;

/// Bulk endpoint receiving transfer packets.
pub const EP_OUT: u8 = 0x02;
/// Bulk endpoint sending transfer replies.
pub const EP_IN: u8 = 0x82;

const INTERFACE: u8 = 0;

const IN_REQUEST: u8 = request_type(Direction::In, RequestType::Vendor, Recipient::Device);
const OUT_REQUEST: u8 = request_type(Direction::Out, RequestType::Vendor, Recipient::Device);

const TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) fn to_io_err(error: rusb::Error) -> Error {
    let kind = match error {
        rusb::Error::Io => ErrorKind::ConnectionAborted,
        rusb::Error::InvalidParam => ErrorKind::InvalidInput,
        rusb::Error::Access => ErrorKind::PermissionDenied,
        rusb::Error::NoDevice => ErrorKind::NotFound,
        rusb::Error::NotFound => ErrorKind::NotFound,
        rusb::Error::Busy => ErrorKind::ResourceBusy,
        rusb::Error::Timeout => ErrorKind::TimedOut,
        rusb::Error::Overflow => ErrorKind::OutOfMemory,
        rusb::Error::Pipe => ErrorKind::BrokenPipe,
        rusb::Error::Interrupted => ErrorKind::Interrupted,
        rusb::Error::NoMem => ErrorKind::OutOfMemory,
        rusb::Error::NotSupported => ErrorKind::Unsupported,
        rusb::Error::BadDescriptor => ErrorKind::InvalidInput,
        rusb::Error::Other => ErrorKind::Other,
    };

    Error::new(kind, error)
}

/// Blocking bulk transfers of one connection.
#[derive(Default)]
struct BulkTasks {
    interrupted: Mutex<Vec<JoinHandle<()>>>,
}

impl BulkTasks {
    /// Runs `f` on the blocking thread pool after all interrupted transfers finished.
    async fn run<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce() -> rusb::Result<R> + Send + 'static,
    {
        self.drain().await;

        let (tx, rx) = oneshot::channel();
        let task = spawn_blocking(move || {
            let _ = tx.send(f());
        });
        let mut pending = PendingTask { interrupted: &self.interrupted, task: Some(task) };

        let res = rx.await;
        pending.join().await?;
        match res {
            Ok(res) => res.map_err(to_io_err),
            Err(_) => Err(Error::other("bulk transfer task ended without result")),
        }
    }

    /// Waits for transfers whose caller went away.
    async fn drain(&self) {
        loop {
            let task = self.interrupted.lock().unwrap_or_else(PoisonError::into_inner).pop();
            let Some(task) = task else { break };

            tracing::debug!("waiting for interrupted bulk transfer");
            let mut pending = PendingTask { interrupted: &self.interrupted, task: Some(task) };
            if let Err(err) = pending.join().await {
                tracing::warn!("interrupted bulk transfer failed: {err}");
            }
        }
    }
}

/// Blocking task that is remembered as interrupted when dropped before it finished.
struct PendingTask<'a> {
    interrupted: &'a Mutex<Vec<JoinHandle<()>>>,
    task: Option<JoinHandle<()>>,
}

impl PendingTask<'_> {
    async fn join(&mut self) -> std::result::Result<(), JoinError> {
        if let Some(task) = &mut self.task {
            let res = task.await;
            self.task = None;
            res?;
        }
        Ok(())
    }
}

impl Drop for PendingTask<'_> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                self.interrupted.lock().unwrap_or_else(PoisonError::into_inner).push(task);
            }
        }
    }
}

/// USB connection to an evaluation board.
pub struct UsbTransport<C: UsbContext = GlobalContext> {
    hnd: Arc<DeviceHandle<C>>,
    id: DeviceId,
    bulk: BulkTasks,
}

impl<C: UsbContext> fmt::Debug for UsbTransport<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("UsbTransport").field(&self.id).finish()
    }
}

impl UsbTransport {
    /// Opens the first attached evaluation board.
    pub fn open() -> Result<Self> {
        let hnd = rusb::open_device_with_vid_pid(VID, PID)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "no Si700x evaluation board attached"))?;
        Self::new(hnd)
    }
}

impl<C: UsbContext + 'static> UsbTransport<C> {
    /// Claims the board interface of an opened device.
    pub fn new(hnd: DeviceHandle<C>) -> Result<Self> {
        let dev = hnd.device();
        let id = DeviceId::usb(dev.bus_number(), dev.address());

        if let Err(err) = hnd.set_auto_detach_kernel_driver(true) {
            tracing::debug!("kernel driver auto detach unavailable: {err}");
        }
        hnd.claim_interface(INTERFACE).map_err(to_io_err)?;
        hnd.clear_halt(EP_IN).map_err(to_io_err)?;
        hnd.clear_halt(EP_OUT).map_err(to_io_err)?;

        tracing::debug!("board {id} opened");
        Ok(Self { hnd: Arc::new(hnd), id, bulk: BulkTasks::default() })
    }

    /// Identifier of the device.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Wraps this connection into a board named after its identifier.
    pub fn into_board(self) -> Board<Self> {
        let name = format!("si700x {}", self.id);
        Board::with_name(self, name)
    }
}

impl<C: UsbContext + 'static> Transport for UsbTransport<C> {
    async fn bulk_out(&self, data: Bytes) -> Result<usize> {
        let hnd = self.hnd.clone();
        self.bulk.run(move || hnd.write_bulk(EP_OUT, &data, TIMEOUT)).await
    }

    async fn bulk_in(&self, len: usize) -> Result<BytesMut> {
        let hnd = self.hnd.clone();
        self.bulk
            .run(move || {
                let mut buf = BytesMut::zeroed(len);
                let n = hnd.read_bulk(EP_IN, &mut buf, TIMEOUT)?;
                buf.truncate(n);
                Ok(buf)
            })
            .await
    }
}

impl<C: UsbContext + 'static> ControlTransport for UsbTransport<C> {
    async fn control_out(&self, request: u8, value: u16, index: u16) -> Result<()> {
        let hnd = self.hnd.clone();
        spawn_blocking(move || hnd.write_control(OUT_REQUEST, request, value, index, &[], TIMEOUT))
            .await?
            .map_err(to_io_err)?;
        Ok(())
    }

    async fn control_in(&self, request: u8, value: u16, index: u16, len: usize) -> Result<BytesMut> {
        let hnd = self.hnd.clone();
        spawn_blocking(move || {
            let mut buf = BytesMut::zeroed(len);
            let n = hnd.read_control(IN_REQUEST, request, value, index, &mut buf, TIMEOUT)?;
            buf.truncate(n);
            Ok::<_, rusb::Error>(buf)
        })
        .await?
        .map_err(to_io_err)
    }
}

impl<C: UsbContext> Drop for UsbTransport<C> {
    fn drop(&mut self) {
        if Arc::strong_count(&self.hnd) == 1 {
            if let Err(err) = self.hnd.release_interface(INTERFACE) {
                tracing::debug!("releasing interface failed: {err}");
            }
            tracing::debug!("board {} closed", self.id);
        }
    }
}
