//! USB transport abstraction for Dymo scales.
//!
//! The session logic never talks to a USB stack directly. It goes through the
//! [`Transport`] and [`Connection`] traits, which cover enumeration, opening a
//! device, claiming its HID interface, polling the interrupt endpoint and
//! hotplug notifications. The `rusb` feature provides a libusb-backed
//! implementation; tests plug in a fake.

#[cfg(feature = "rusb")]
pub mod libusb;

use crate::decoder::{Report, ShortReport};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Dymo vendor id (0x0922).
pub const VENDOR_ID: u16 = 2338;

/// HID interface carrying the weight reports.
pub const INTERFACE: u8 = 0;

/// Interrupt IN endpoint polled for reports (endpoint 2, direction IN).
pub const ENDPOINT: u8 = 0x82;

/// Number of reports buffered between the polling side and the session.
pub const REPORT_QUEUE_DEPTH: usize = 6;

/// Channel buffer size for hotplug notifications.
pub const HOTPLUG_CHANNEL_BUFFER_SIZE: usize = 16;

/// Error type for transport operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Error reported by the USB stack
    #[error("USB error: {0}")]
    Usb(String),
    /// The endpoint delivered a truncated report
    #[error(transparent)]
    ShortReport(#[from] ShortReport),
    /// The device disappeared between enumeration and open
    #[error("device {0} not found")]
    NotFound(DeviceAddress),
    /// The platform cannot deliver attach/detach notifications
    #[error("hotplug notifications are not supported on this platform")]
    HotplugUnsupported,
    /// Backend not available (not compiled in)
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// Bus location of a device. Opaque to the session, meaningful to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceAddress {
    pub bus: u8,
    pub address: u8,
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}:{:03}", self.bus, self.address)
    }
}

/// A candidate scale found during enumeration or announced by hotplug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub handle: DeviceAddress,
}

impl DeviceDescriptor {
    pub fn is_scale(&self) -> bool {
        self.vendor_id == VENDOR_ID
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} at {}",
            self.vendor_id, self.product_id, self.handle
        )
    }
}

/// Attach/detach notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugEvent {
    Attach(DeviceDescriptor),
    Detach(DeviceDescriptor),
}

impl HotplugEvent {
    pub fn device(&self) -> &DeviceDescriptor {
        match self {
            HotplugEvent::Attach(d) | HotplugEvent::Detach(d) => d,
        }
    }
}

/// One item from a report stream: a report or an endpoint error.
pub type ReportResult = Result<Report, TransportError>;

/// Boxed future returned by asynchronous transport operations.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// USB host facility used by a session.
pub trait Transport: Send + Sync {
    /// List devices matching `vendor_id`.
    fn enumerate(&self, vendor_id: u16) -> TransportFuture<'_, Vec<DeviceDescriptor>>;

    /// Open a connection to an enumerated device.
    fn open(&self, device: DeviceDescriptor) -> TransportFuture<'_, Box<dyn Connection>>;

    /// Subscribe to attach/detach notifications for `vendor_id`.
    fn hotplug(&self, vendor_id: u16) -> Result<mpsc::Receiver<HotplugEvent>, TransportError>;
}

/// An open device.
pub trait Connection: Send {
    fn reset(&mut self) -> Result<(), TransportError>;

    fn kernel_driver_active(&mut self, interface: u8) -> Result<bool, TransportError>;

    fn detach_kernel_driver(&mut self, interface: u8) -> Result<(), TransportError>;

    fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError>;

    /// Start polling `endpoint`, consuming the connection.
    ///
    /// The stream ends (yields `None`) when the device stops delivering, and
    /// the connection is released once the polling side notices the stream
    /// was stopped or dropped. Backends that hold the device past that point
    /// attach a [`Released`] signal with [`ReportStream::with_release`].
    fn poll_reports(
        self: Box<Self>,
        endpoint: u8,
        report_size: usize,
        queue_depth: usize,
    ) -> Result<ReportStream, TransportError>;
}

/// Create a connected producer/consumer pair for a report stream.
pub fn report_channel(queue_depth: usize) -> (ReportSink, ReportStream) {
    let (tx, rx) = mpsc::channel(queue_depth.max(1));
    let stopped = Arc::new(AtomicBool::new(false));
    (
        ReportSink {
            tx,
            stopped: Arc::clone(&stopped),
        },
        ReportStream {
            rx,
            stopped,
            released: None,
        },
    )
}

/// Create a guard for the polling side and the matching [`Released`] signal.
pub fn release_signal() -> (ReleaseGuard, Released) {
    let (tx, rx) = oneshot::channel();
    (ReleaseGuard { _tx: tx }, Released(rx))
}

/// Held by the polling side for as long as it owns the device.
///
/// Dropping it, explicitly or when the polling thread exits, resolves the
/// matching [`Released`].
#[derive(Debug)]
pub struct ReleaseGuard {
    _tx: oneshot::Sender<()>,
}

/// Resolves once the polling side has let go of the device.
#[derive(Debug)]
pub struct Released(oneshot::Receiver<()>);

impl Released {
    pub async fn wait(self) {
        // The guard never sends; a closed channel is the signal.
        let _ = self.0.await;
    }
}

/// Producer side of a report stream, held by the polling task.
///
/// Dropping the sink ends the stream.
#[derive(Debug, Clone)]
pub struct ReportSink {
    tx: mpsc::Sender<ReportResult>,
    stopped: Arc<AtomicBool>,
}

impl ReportSink {
    /// `true` once the consumer stopped or dropped the stream.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire) || self.tx.is_closed()
    }

    /// Queue an item, waiting for room. Returns `false` if the consumer is gone.
    pub async fn send(&self, item: ReportResult) -> bool {
        !self.is_stopped() && self.tx.send(item).await.is_ok()
    }

    #[cfg(test)]
    pub(crate) fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stopped)
    }

    /// Blocking variant of [`ReportSink::send`] for polling threads.
    ///
    /// Must not be called from within an async runtime.
    pub fn blocking_send(&self, item: ReportResult) -> bool {
        !self.is_stopped() && self.tx.blocking_send(item).is_ok()
    }
}

/// Consumer side of a report stream, owned by the session.
#[derive(Debug)]
pub struct ReportStream {
    rx: mpsc::Receiver<ReportResult>,
    stopped: Arc<AtomicBool>,
    released: Option<Released>,
}

impl ReportStream {
    /// Next report, endpoint error, or `None` once the stream ended or was stopped.
    ///
    /// Reports still queued when the stream is stopped are discarded.
    pub async fn recv(&mut self) -> Option<ReportResult> {
        if self.is_stopped() {
            return None;
        }
        self.rx.recv().await
    }

    /// Stop polling. Safe to call any number of times.
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::Release);
        self.rx.close();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Attach the signal the polling side drops once the device is free.
    pub fn with_release(mut self, released: Released) -> Self {
        self.released = Some(released);
        self
    }

    /// Stop polling and hand back the release signal, if the backend gave one.
    pub fn close(mut self) -> Option<Released> {
        self.stop();
        self.released.take()
    }
}
