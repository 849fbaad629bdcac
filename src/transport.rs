//! Transport primitives provided by a USB backend.
//!
//! The native backend lives in the [`host`](crate::host) module.
//! Tests and other backends implement these traits directly.

use bytes::{Bytes, BytesMut};
use std::{future::Future, io::Result, sync::Arc};

/// Bulk endpoints carrying transfer packets.
///
/// A transfer whose future is dropped may still be running. It must complete
/// or time out before the next bulk transfer starts, otherwise an orphaned
/// read can consume the reply to a later request.
pub trait Transport: Send + Sync {
    /// Sends `data` to the outbound endpoint.
    ///
    /// Returns the number of bytes actually sent.
    fn bulk_out(&self, data: Bytes) -> impl Future<Output = Result<usize>> + Send;

    /// Receives up to `len` bytes from the inbound endpoint.
    fn bulk_in(&self, len: usize) -> impl Future<Output = Result<BytesMut>> + Send;
}

/// Vendor control requests on the default control pipe.
pub trait ControlTransport: Send + Sync {
    /// Issues a host-to-device vendor request without data stage.
    fn control_out(&self, request: u8, value: u16, index: u16) -> impl Future<Output = Result<()>> + Send;

    /// Issues a device-to-host vendor request reading up to `len` bytes.
    fn control_in(
        &self, request: u8, value: u16, index: u16, len: usize,
    ) -> impl Future<Output = Result<BytesMut>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn bulk_out(&self, data: Bytes) -> impl Future<Output = Result<usize>> + Send {
        (**self).bulk_out(data)
    }

    fn bulk_in(&self, len: usize) -> impl Future<Output = Result<BytesMut>> + Send {
        (**self).bulk_in(len)
    }
}

impl<T: ControlTransport> ControlTransport for Arc<T> {
    fn control_out(&self, request: u8, value: u16, index: u16) -> impl Future<Output = Result<()>> + Send {
        (**self).control_out(request, value, index)
    }

    fn control_in(
        &self, request: u8, value: u16, index: u16, len: usize,
    ) -> impl Future<Output = Result<BytesMut>> + Send {
        (**self).control_in(request, value, index, len)
    }
}

impl<T: Transport> Transport for &T {
    fn bulk_out(&self, data: Bytes) -> impl Future<Output = Result<usize>> + Send {
        (**self).bulk_out(data)
    }

    fn bulk_in(&self, len: usize) -> impl Future<Output = Result<BytesMut>> + Send {
        (**self).bulk_in(len)
    }
}

impl<T: ControlTransport> ControlTransport for &T {
    fn control_out(&self, request: u8, value: u16, index: u16) -> impl Future<Output = Result<()>> + Send {
        (**self).control_out(request, value, index)
    }

    fn control_in(
        &self, request: u8, value: u16, index: u16, len: usize,
    ) -> impl Future<Output = Result<BytesMut>> + Send {
        (**self).control_in(request, value, index, len)
    }
}
